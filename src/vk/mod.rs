pub mod api;
pub mod monitor;

pub use monitor::{VkFormatter, VkMonitor};
