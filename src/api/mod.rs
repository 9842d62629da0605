//! S3 API implementation

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod host;
pub mod log;
pub mod xml;

pub use errors::S3Error;
