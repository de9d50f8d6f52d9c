pub mod media;
pub mod monitor;

pub use monitor::{TelegramFormatter, TelegramMonitor};
