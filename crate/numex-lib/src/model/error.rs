use std::path::PathBuf;

use tarpc::client::RpcError;
use thiserror::Error;

/// Invalid or unusable security configuration.
///
/// Configuration errors are never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A flag required by the security mode wasn't given.
    #[error("{mode} requires {flag}")]
    MissingCredential {
        mode: &'static str,
        flag: &'static str,
    },

    #[error("{}: cannot read", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: invalid PEM file", .path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    #[error("{}: no certificates found", .0.display())]
    NoCertificates(PathBuf),

    #[error("{}: invalid CA certificate", .path.display())]
    BadCaCertificate {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("invalid TLS configuration")]
    Tls(#[from] rustls::Error),

    #[error("invalid client certificate verifier")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("invalid TLS server name: {0:?}")]
    ServerName(String),
}

/// Errors reported by the client exchange loop.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session couldn't be established.
    #[error("Error connecting to the server: {0:#}")]
    Connect(anyhow::Error),

    /// An established session failed during an exchange.
    #[error("Error while communicating with the server: {0}")]
    Exchange(#[from] RpcError),

    /// The retry strategy ran out of delays.
    #[error("Giving up after {0} consecutive failures")]
    GaveUp(u32),
}

impl ClientError {
    /// Whether the exchange loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connect(_) | ClientError::Exchange(_))
    }
}
