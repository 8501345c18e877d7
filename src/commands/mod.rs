//! Admin commands.
//!
//! The configured admin drives the cloner by sending slash commands to the
//! bot account. Replies are plain text in the admin's chosen language.

mod handler;
mod texts;
mod types;

pub use handler::CommandHandler;
pub use texts::Lang;
pub use types::{BotCommand, CommandResult, UsageError};
