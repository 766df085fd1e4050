#![doc = include_str!("../README.md")]
#![warn(missing_docs, missing_debug_implementations)]
mod concurrent;
mod config;
mod error;
mod monitor;
mod resource;
mod stats;
mod thread_local;

pub use concurrent::*;
pub use config::*;
pub use error::*;
pub use monitor::*;
pub use resource::*;
pub use stats::*;
pub use thread_local::*;
