//! CLI output formatting utilities.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const CURRENT: &str = "*";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message
  );
}

/// Print one axis section: a heading plus `marker name description` rows.
pub fn print_axis<'a>(
  heading: &str,
  items: impl IntoIterator<Item = (&'a str, &'a str)>,
  is_current: impl Fn(&str) -> bool,
) {
  println!("{heading}:");

  let items: Vec<_> = items.into_iter().collect();
  let width = items.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

  for (name, description) in items {
    let marker = if is_current(name) { symbols::CURRENT } else { " " };
    if description.is_empty() {
      println!("  {marker} {name}");
    } else {
      println!("  {marker} {name:width$}  {description}");
    }
  }
}
