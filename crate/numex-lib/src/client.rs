//! Client side of the number exchange.
//!
//! [ExchangeLoop] owns the connect, exchange and retry cycle. The
//! session it works on comes from a [Connect] implementation, usually
//! [TcpConnect](crate::transport::tcp::TcpConnect).

pub mod deadline;
pub mod exchange;

pub use exchange::{
    ClientConnectionState, Connect, ExchangeLoop, ExchangeOptions, ExchangeReport,
    default_retry_strategy,
};
