//! Variable expansion for descriptor text.
//!
//! Descriptor string fields may reference variables as `%NAME` or `%{NAME}`.
//! References are resolved against an explicit variable map supplied by the
//! caller (the engine never reads ambient process state here), plus the
//! synthetic `STRATA_PROJECT_ROOT` variable injected by the loader.
//!
//! # Syntax
//!
//! - `%NAME` - reference, where NAME is `[A-Za-z_][A-Za-z0-9_]*`
//! - `%{NAME}` - braced reference, useful adjacent to identifier characters
//! - `%%` - a literal `%`
//!
//! A `%` followed by anything else passes through unchanged.
//!
//! # Termination
//!
//! A variable's value may itself contain references. Expansion follows the
//! chain recursively, tracking the in-progress names so a cycle is reported
//! instead of looping, and bounding the chain depth as a backstop.

use std::collections::BTreeMap;

use serde_yaml::Value;
use thiserror::Error;

use crate::consts::MAX_EXPANSION_DEPTH;

/// Errors that can occur during variable expansion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
  /// A reference names a variable that is not defined.
  #[error("undefined variable '%{{{name}}}'")]
  Undefined { name: String },

  /// A `%{` reference is missing its closing brace.
  #[error("unterminated reference '%{{{rest}'")]
  Unterminated { rest: String },

  /// A variable's expansion reintroduces itself, directly or transitively.
  #[error("cyclic reference while expanding '{name}' (chain: {chain})")]
  Cycle { name: String, chain: String },

  /// The reference chain exceeded the maximum depth.
  #[error("expansion of '{name}' exceeded maximum depth {max}")]
  TooDeep { name: String, max: usize },
}

/// Expand all variable references in `input` against `vars`.
pub fn expand_str(input: &str, vars: &BTreeMap<String, String>) -> Result<String, ExpandError> {
  let mut chain = Vec::new();
  expand_inner(input, vars, &mut chain)
}

/// Recursively expand every string in a YAML value tree.
///
/// Mapping keys are left untouched; only values are expanded.
pub fn expand_value(value: Value, vars: &BTreeMap<String, String>) -> Result<Value, ExpandError> {
  match value {
    Value::String(s) => Ok(Value::String(expand_str(&s, vars)?)),
    Value::Sequence(items) => {
      let expanded = items
        .into_iter()
        .map(|item| expand_value(item, vars))
        .collect::<Result<Vec<_>, _>>()?;
      Ok(Value::Sequence(expanded))
    }
    Value::Mapping(map) => {
      let mut expanded = serde_yaml::Mapping::with_capacity(map.len());
      for (k, v) in map {
        expanded.insert(k, expand_value(v, vars)?);
      }
      Ok(Value::Mapping(expanded))
    }
    other => Ok(other),
  }
}

fn expand_inner(
  input: &str,
  vars: &BTreeMap<String, String>,
  chain: &mut Vec<String>,
) -> Result<String, ExpandError> {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('%') {
    out.push_str(&rest[..pos]);
    rest = &rest[pos + 1..];

    if let Some(stripped) = rest.strip_prefix('%') {
      out.push('%');
      rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('{') {
      let Some(end) = stripped.find('}') else {
        return Err(ExpandError::Unterminated {
          rest: stripped.to_string(),
        });
      };
      let name = &stripped[..end];
      out.push_str(&resolve(name, vars, chain)?);
      rest = &stripped[end + 1..];
    } else {
      let len = ident_len(rest);
      if len == 0 {
        // Bare '%' with no reference following it.
        out.push('%');
      } else {
        let name = &rest[..len];
        out.push_str(&resolve(name, vars, chain)?);
        rest = &rest[len..];
      }
    }
  }

  out.push_str(rest);
  Ok(out)
}

fn resolve(
  name: &str,
  vars: &BTreeMap<String, String>,
  chain: &mut Vec<String>,
) -> Result<String, ExpandError> {
  if chain.iter().any(|n| n == name) {
    return Err(ExpandError::Cycle {
      name: name.to_string(),
      chain: format!("{} -> {}", chain.join(" -> "), name),
    });
  }
  if chain.len() >= MAX_EXPANSION_DEPTH {
    return Err(ExpandError::TooDeep {
      name: name.to_string(),
      max: MAX_EXPANSION_DEPTH,
    });
  }

  let value = vars.get(name).ok_or_else(|| ExpandError::Undefined {
    name: name.to_string(),
  })?;

  chain.push(name.to_string());
  let expanded = expand_inner(value, vars, chain)?;
  chain.pop();
  Ok(expanded)
}

fn ident_len(s: &str) -> usize {
  let mut chars = s.char_indices();
  match chars.next() {
    Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return 0,
  }
  for (i, c) in chars {
    if !(c.is_ascii_alphanumeric() || c == '_') {
      return i;
    }
  }
  s.len()
}
