pub mod commands;
pub mod notifier;

pub use commands::{start_bot, status_text, BotDeps, Command};
pub use notifier::TelegramNotifier;
