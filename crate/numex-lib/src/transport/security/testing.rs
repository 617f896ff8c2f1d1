//! Throwaway certificate authorities for tests.

use std::path::PathBuf;

use assert_fs::TempDir;
use assert_fs::prelude::*;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};

use super::{ClientSecurity, ServerSecurity};

/// A CA, a server and a client certificate issued by it, plus an
/// unrelated CA with its own client certificate, written as PEM files
/// into a temporary directory.
///
/// The server certificate is valid for `localhost`.
pub struct TestPki {
    dir: TempDir,
}

impl TestPki {
    pub fn generate() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;

        let ca = Authority::new("numex test CA")?;
        ca.write(&dir, "ca")?;
        ca.issue("localhost")?.write(&dir, "server")?;
        ca.issue("client")?.write(&dir, "client")?;

        let other = Authority::new("other CA")?;
        other.write(&dir, "other-ca")?;
        other.issue("intruder")?.write(&dir, "intruder")?;

        Ok(Self { dir })
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.path("ca.pem")
    }

    pub fn other_ca_cert(&self) -> PathBuf {
        self.path("other-ca.pem")
    }

    pub fn server_cert(&self) -> PathBuf {
        self.path("server.pem")
    }

    pub fn server_key(&self) -> PathBuf {
        self.path("server.key")
    }

    pub fn client_cert(&self) -> PathBuf {
        self.path("client.pem")
    }

    pub fn client_key(&self) -> PathBuf {
        self.path("client.key")
    }

    /// Client certificate issued by the other CA.
    pub fn intruder_cert(&self) -> PathBuf {
        self.path("intruder.pem")
    }

    pub fn intruder_key(&self) -> PathBuf {
        self.path("intruder.key")
    }

    pub fn server_tls(&self) -> ServerSecurity {
        ServerSecurity::ServerAuth {
            cert: self.server_cert(),
            key: self.server_key(),
        }
    }

    pub fn server_mtls(&self) -> ServerSecurity {
        ServerSecurity::MutualAuth {
            ca_cert: self.ca_cert(),
            cert: self.server_cert(),
            key: self.server_key(),
        }
    }

    pub fn client_tls(&self) -> ClientSecurity {
        ClientSecurity::ServerAuth {
            ca_cert: self.ca_cert(),
        }
    }

    pub fn client_mtls(&self) -> ClientSecurity {
        ClientSecurity::MutualAuth {
            ca_cert: self.ca_cert(),
            cert: self.client_cert(),
            key: self.client_key(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.child(name).to_path_buf()
    }
}

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> anyhow::Result<Self> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key)?;

        Ok(Self { cert, key })
    }

    fn issue(&self, name: &str) -> anyhow::Result<Issued> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![name.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.signed_by(&key, &self.cert, &self.key)?;

        Ok(Issued { cert, key })
    }

    fn write(&self, dir: &TempDir, name: &str) -> anyhow::Result<()> {
        dir.child(format!("{name}.pem")).write_str(&self.cert.pem())?;

        Ok(())
    }
}

struct Issued {
    cert: Certificate,
    key: KeyPair,
}

impl Issued {
    fn write(&self, dir: &TempDir, name: &str) -> anyhow::Result<()> {
        dir.child(format!("{name}.pem")).write_str(&self.cert.pem())?;
        dir.child(format!("{name}.key"))
            .write_str(&self.key.serialize_pem())?;

        Ok(())
    }
}
