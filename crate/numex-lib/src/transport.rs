//! Transport layer for numex
//!
//! - `security`: Transport selection: plaintext, TLS or mutual TLS.
//! - `tcp`: TCP transport, server lifecycle and client connections.
//! - `hostport`: Address parsing and resolution.
pub mod hostport;
pub mod security;
pub mod tcp;
