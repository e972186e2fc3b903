// splitmux - Connection multiplexing pool for split HTTP tunneling transports

pub mod config;
pub mod mux;
pub mod utils;

// Re-export commonly used types
pub use mux::{DialerClientFactory, DialerClientHandle, MuxManager};
pub use utils::error::{MuxError, Result};
