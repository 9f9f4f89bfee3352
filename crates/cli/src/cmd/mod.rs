mod configure;
mod list;
mod validate;

pub use configure::{ConfigureArgs, cmd_configure};
pub use list::cmd_list;
pub use validate::cmd_validate;
