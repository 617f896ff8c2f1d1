//! Transport selection: plaintext, TLS or mutual TLS.
//!
//! [ClientSecurity] and [ServerSecurity] describe what the command
//! line asked for. [ClientTransport::build] and
//! [ServerTransport::build] turn them into a connector or acceptor,
//! reading the PEM credential files on the way.

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::model::ConfigError;

pub use rustls::crypto::aws_lc_rs::default_provider;

/// Client-side security mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSecurity {
    /// Plaintext connection.
    Disabled,

    /// TLS; the server must present a certificate issued by `ca_cert`.
    ServerAuth { ca_cert: PathBuf },

    /// TLS; the server must present a certificate issued by
    /// `ca_cert` and the client presents `cert`.
    MutualAuth {
        ca_cert: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    },
}

impl ClientSecurity {
    /// Build from command-line flags.
    ///
    /// `m_tls` implies `tls`. Every path the chosen mode needs must be
    /// set; paths it doesn't need are ignored.
    pub fn from_flags(
        tls: bool,
        m_tls: bool,
        ca_cert: Option<PathBuf>,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if !tls && !m_tls {
            return Ok(ClientSecurity::Disabled);
        }
        let mode = if m_tls { "mTLS" } else { "TLS" };
        let ca_cert = required(mode, "--ca-cert", ca_cert)?;
        if !m_tls {
            return Ok(ClientSecurity::ServerAuth { ca_cert });
        }

        Ok(ClientSecurity::MutualAuth {
            ca_cert,
            cert: required(mode, "--cert", cert)?,
            key: required(mode, "--key", key)?,
        })
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, ClientSecurity::Disabled)
    }
}

/// Server-side security mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSecurity {
    /// Plaintext connections.
    Disabled,

    /// TLS; the server presents `cert`, clients stay anonymous.
    ServerAuth { cert: PathBuf, key: PathBuf },

    /// TLS; the server presents `cert` and every client must present
    /// a certificate issued by `ca_cert`.
    MutualAuth {
        ca_cert: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    },
}

impl ServerSecurity {
    /// Build from command-line flags.
    ///
    /// `m_tls` implies `tls`. Asking for mutual TLS without a CA is
    /// an error, never a downgrade to server-only TLS.
    pub fn from_flags(
        tls: bool,
        m_tls: bool,
        ca_cert: Option<PathBuf>,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if !tls && !m_tls {
            return Ok(ServerSecurity::Disabled);
        }
        let mode = if m_tls { "mTLS" } else { "TLS" };
        let cert = required(mode, "--cert", cert)?;
        let key = required(mode, "--key", key)?;
        if !m_tls {
            return Ok(ServerSecurity::ServerAuth { cert, key });
        }

        Ok(ServerSecurity::MutualAuth {
            ca_cert: required(mode, "--ca-cert", ca_cert)?,
            cert,
            key,
        })
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, ServerSecurity::Disabled)
    }
}

fn required(
    mode: &'static str,
    flag: &'static str,
    value: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    value.ok_or(ConfigError::MissingCredential { mode, flag })
}

/// What the client wraps its TCP connections in.
#[derive(Clone)]
pub enum ClientTransport {
    Plain,
    Tls(TlsConnector),
}

impl ClientTransport {
    /// Load credentials and build a connector for the given mode.
    pub fn build(security: &ClientSecurity) -> Result<Self, ConfigError> {
        match security {
            ClientSecurity::Disabled => Ok(ClientTransport::Plain),
            ClientSecurity::ServerAuth { ca_cert } => {
                make_tls_connector(ca_cert, None).map(ClientTransport::Tls)
            }
            ClientSecurity::MutualAuth { ca_cert, cert, key } => {
                make_tls_connector(ca_cert, Some((cert, key))).map(ClientTransport::Tls)
            }
        }
    }
}

/// What the server wraps accepted TCP connections in.
#[derive(Clone)]
pub enum ServerTransport {
    Plain,
    Tls(TlsAcceptor),
}

impl ServerTransport {
    /// Load credentials and build an acceptor for the given mode.
    pub fn build(security: &ServerSecurity) -> Result<Self, ConfigError> {
        match security {
            ServerSecurity::Disabled => Ok(ServerTransport::Plain),
            ServerSecurity::ServerAuth { cert, key } => {
                make_tls_acceptor(cert, key, None).map(ServerTransport::Tls)
            }
            ServerSecurity::MutualAuth { ca_cert, cert, key } => {
                make_tls_acceptor(cert, key, Some(ca_cert)).map(ServerTransport::Tls)
            }
        }
    }
}

/// Create a TlsConnector (client-side) trusting the given CA.
///
/// If `identity` is set, the client presents that certificate and
/// key.
pub fn make_tls_connector(
    ca_cert: &Path,
    identity: Option<(&Path, &Path)>,
) -> Result<TlsConnector, ConfigError> {
    let builder = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(load_root_store(ca_cert)?);
    let config = match identity {
        None => builder.with_no_client_auth(),
        Some((cert, key)) => {
            builder.with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)?
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Create a TlsAcceptor (server-side) presenting the given certificate.
///
/// If `client_ca` is set, clients must present a certificate issued by
/// that CA; connections without one fail the handshake.
pub fn make_tls_acceptor(
    cert: &Path,
    key: &Path,
    client_ca: Option<&Path>,
) -> Result<TlsAcceptor, ConfigError> {
    let provider = Arc::new(default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;
    let certs = load_certs(cert)?;
    let key = load_private_key(key)?;
    let config = match client_ca {
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
        Some(ca) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(load_root_store(ca)?), provider)
                    .build()?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load all certificates from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&data)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ConfigError::NoCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let data = read_file(path)?;

    PrivateKeyDer::from_pem_slice(&data).map_err(|source| ConfigError::Pem {
        path: path.to_path_buf(),
        source,
    })
}

/// Build a root store containing all certificates of a PEM file.
fn load_root_store(path: &Path) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|source| ConfigError::BadCaCertificate {
                path: path.to_path_buf(),
                source,
            })?;
    }

    Ok(roots)
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::security::testing::TestPki;
    use crate::utils::async_utils::AbortOnDrop;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn client_flags_disabled() -> anyhow::Result<()> {
        assert_eq!(
            ClientSecurity::Disabled,
            ClientSecurity::from_flags(false, false, None, None, None)?
        );
        // Credentials are ignored without --tls
        assert_eq!(
            ClientSecurity::Disabled,
            ClientSecurity::from_flags(false, false, Some("ca.pem".into()), None, None)?
        );

        Ok(())
    }

    #[test]
    fn client_flags_tls() -> anyhow::Result<()> {
        assert_eq!(
            ClientSecurity::ServerAuth {
                ca_cert: "ca.pem".into()
            },
            ClientSecurity::from_flags(true, false, Some("ca.pem".into()), None, None)?
        );
        assert!(matches!(
            ClientSecurity::from_flags(true, false, None, None, None),
            Err(ConfigError::MissingCredential {
                mode: "TLS",
                flag: "--ca-cert"
            })
        ));

        Ok(())
    }

    #[test]
    fn client_flags_mtls() -> anyhow::Result<()> {
        assert_eq!(
            ClientSecurity::MutualAuth {
                ca_cert: "ca.pem".into(),
                cert: "client.pem".into(),
                key: "client.key".into(),
            },
            // --m-tls implies --tls
            ClientSecurity::from_flags(
                false,
                true,
                Some("ca.pem".into()),
                Some("client.pem".into()),
                Some("client.key".into())
            )?
        );
        assert!(matches!(
            ClientSecurity::from_flags(true, true, Some("ca.pem".into()), None, None),
            Err(ConfigError::MissingCredential {
                mode: "mTLS",
                flag: "--cert"
            })
        ));
        assert!(matches!(
            ClientSecurity::from_flags(
                true,
                true,
                Some("ca.pem".into()),
                Some("client.pem".into()),
                None
            ),
            Err(ConfigError::MissingCredential {
                mode: "mTLS",
                flag: "--key"
            })
        ));

        Ok(())
    }

    #[test]
    fn server_flags() -> anyhow::Result<()> {
        assert_eq!(
            ServerSecurity::Disabled,
            ServerSecurity::from_flags(false, false, None, None, None)?
        );
        assert_eq!(
            ServerSecurity::ServerAuth {
                cert: "server.pem".into(),
                key: "server.key".into()
            },
            ServerSecurity::from_flags(
                true,
                false,
                None,
                Some("server.pem".into()),
                Some("server.key".into())
            )?
        );
        assert!(matches!(
            ServerSecurity::from_flags(true, false, None, None, Some("server.key".into())),
            Err(ConfigError::MissingCredential {
                mode: "TLS",
                flag: "--cert"
            })
        ));

        Ok(())
    }

    #[test]
    fn server_flags_mtls_never_downgrades() {
        assert!(matches!(
            ServerSecurity::from_flags(
                true,
                true,
                None,
                Some("server.pem".into()),
                Some("server.key".into())
            ),
            Err(ConfigError::MissingCredential {
                mode: "mTLS",
                flag: "--ca-cert"
            })
        ));
    }

    #[test]
    fn disabled_reads_nothing() -> anyhow::Result<()> {
        assert!(matches!(
            ClientTransport::build(&ClientSecurity::Disabled)?,
            ClientTransport::Plain
        ));
        assert!(matches!(
            ServerTransport::build(&ServerSecurity::Disabled)?,
            ServerTransport::Plain
        ));

        Ok(())
    }

    #[test]
    fn build_missing_file() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let missing = temp.child("missing.pem").to_path_buf();
        let res = ClientTransport::build(&ClientSecurity::ServerAuth {
            ca_cert: missing.clone(),
        });
        assert!(
            matches!(&res, Err(ConfigError::Read { path, .. }) if *path == missing),
            "{:?}",
            res.err()
        );

        Ok(())
    }

    #[test]
    fn build_not_a_certificate() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let garbage = temp.child("garbage.pem");
        garbage.write_str("not a certificate")?;
        let res = ClientTransport::build(&ClientSecurity::ServerAuth {
            ca_cert: garbage.to_path_buf(),
        });
        assert!(
            matches!(res, Err(ConfigError::NoCertificates(_))),
            "{:?}",
            res.err()
        );

        Ok(())
    }

    #[test]
    fn build_key_mismatch() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        let res = ServerTransport::build(&ServerSecurity::ServerAuth {
            cert: pki.server_cert(),
            key: pki.client_key(),
        });
        assert!(matches!(res, Err(ConfigError::Tls(_))), "{:?}", res.err());

        Ok(())
    }

    #[test]
    fn load_certs_and_keys() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        assert_eq!(1, load_certs(&pki.server_cert())?.len());
        load_private_key(&pki.server_key())?;
        assert!(matches!(
            load_private_key(&pki.server_cert()),
            Err(ConfigError::Pem { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn tls_connect() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        test_connect(pki.server_tls(), pki.client_tls()).await
    }

    #[tokio::test]
    async fn tls_reject_unknown_ca() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        let client = ClientSecurity::ServerAuth {
            ca_cert: pki.other_ca_cert(),
        };
        assert!(test_connect(pki.server_tls(), client).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn mtls_connect() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        test_connect(pki.server_mtls(), pki.client_mtls()).await
    }

    #[tokio::test]
    async fn mtls_reject_client_without_cert() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        assert!(
            test_connect(pki.server_mtls(), pki.client_tls())
                .await
                .is_err()
        );

        Ok(())
    }

    #[tokio::test]
    async fn mtls_reject_client_from_other_ca() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        let client = ClientSecurity::MutualAuth {
            ca_cert: pki.ca_cert(),
            cert: pki.intruder_cert(),
            key: pki.intruder_key(),
        };
        assert!(test_connect(pki.server_mtls(), client).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn tls_server_accepts_client_cert_it_did_not_ask_for() -> anyhow::Result<()> {
        let pki = TestPki::generate()?;
        test_connect(pki.server_tls(), pki.client_mtls()).await
    }

    async fn test_connect(server: ServerSecurity, client: ClientSecurity) -> anyhow::Result<()> {
        let ServerTransport::Tls(acceptor) = ServerTransport::build(&server)? else {
            anyhow::bail!("expected a TLS acceptor");
        };
        let ClientTransport::Tls(connector) = ClientTransport::build(&client)? else {
            anyhow::bail!("expected a TLS connector");
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server: AbortOnDrop<anyhow::Result<()>> = AbortOnDrop::new(tokio::spawn(async move {
            let (tcp, _) = listener.accept().await?;

            let mut tls = acceptor.accept(tcp).await?;
            tls.write_all(b"foobar").await?;
            tls.shutdown().await?;

            Ok(())
        }));

        let tcp = TcpStream::connect(addr).await?;
        let domain = rustls::pki_types::ServerName::try_from("localhost")?;
        let mut tls = connector.connect(domain, tcp).await?;
        let mut buf = vec![0u8; 6];
        tls.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"foobar");

        server.join().await??;
        Ok(())
    }
}
