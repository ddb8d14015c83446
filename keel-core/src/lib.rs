pub mod compiler;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod scope;
pub mod shader;

#[cfg(feature = "window")]
pub mod context;
#[cfg(feature = "window")]
pub mod platform;

pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
