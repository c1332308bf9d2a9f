pub mod component;
pub mod config;
pub mod error;
pub mod init;
pub mod signal;
pub mod tools;

pub use component::ThumbnailPipeline;
pub use error::{ErrorKind, PoolError, ThumbnailError};
