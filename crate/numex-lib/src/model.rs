//! Core types for numex.
mod error;
mod id;
pub mod service;

pub use error::{ClientError, ConfigError};
pub use id::{CLIENT_NAMES, ClientId};
pub use service::{ExchangeMessage, roll};
