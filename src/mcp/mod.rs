pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpToolTransport, ToolTransport};
pub use error::*;
pub use types::*;
