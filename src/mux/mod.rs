pub mod client;
pub mod manager;
pub mod tcp;

pub use client::*;
pub use manager::*;
pub use tcp::*;
