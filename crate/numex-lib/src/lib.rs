//! numex - Number Exchange Library
//!
//! This crate provides the core library for the numex client and
//! daemon. A client repeatedly sends a die roll and its name to the
//! server, which answers with a roll of its own. The connection can
//! be plaintext, TLS or mutual TLS.
//!
//! # Main Components
//!
//! - `client`: Client-side exchange loop, with its reconnection logic.
//! - `metrics`: Prometheus metrics integration for monitoring.
//! - `model`: Core types and service definition.
//! - `server`: Service implementation and worker pool.
//! - `transport`: Plaintext or TLS transport over TCP.
//! - `utils`: Async and logging helpers.

pub mod client;
pub mod metrics;
pub mod model;
pub mod server;
pub mod transport;
pub mod utils;
