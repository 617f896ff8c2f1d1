use anyhow::Context as _;
use std::fmt;
use std::net::SocketAddr;

/// A host:port pair together with the address it resolved to.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct HostPort {
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl HostPort {
    /// Parse a host:port string, resolve DNS, and return a HostPort.
    ///
    /// IPv6 addresses must be bracketed: `[::1]:50051`.
    pub async fn parse(s: &str) -> anyhow::Result<Self> {
        let Some(idx) = s.rfind(':') else {
            anyhow::bail!("Missing port in address: {s}");
        };
        let (host, port_str) = s.split_at(idx);
        let port = port_str[1..]
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("Invalid port in address: {s}"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Self::resolve(host, port).await
    }

    /// Resolve a host name or IP address and port.
    pub async fn resolve(host: &str, port: u16) -> anyhow::Result<Self> {
        let lookup = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let addr = tokio::net::lookup_host(&lookup)
            .await
            .with_context(|| format!("DNS lookup failed for {lookup}"))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("DNS lookup failed for {lookup}"))?;

        Ok(HostPort {
            host: host.to_string(),
            port,
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_ipv4() -> anyhow::Result<()> {
        let hp = HostPort::parse("127.0.0.1:8000").await?;
        assert_eq!(hp.to_string(), "127.0.0.1:8000");
        assert_eq!(hp.addr().port(), 8000);

        Ok(())
    }

    #[tokio::test]
    async fn parse_ipv6() -> anyhow::Result<()> {
        let hp = HostPort::parse("[::1]:8000").await?;
        assert_eq!(hp.to_string(), "[::1]:8000");
        assert_eq!(hp.addr().port(), 8000);

        Ok(())
    }

    #[tokio::test]
    async fn parse_hostname() -> anyhow::Result<()> {
        let hp = HostPort::parse("localhost:1234").await?;
        assert_eq!(hp.to_string(), "localhost:1234");
        assert_eq!(hp.addr().port(), 1234);

        Ok(())
    }

    #[tokio::test]
    async fn parse_invalid() {
        assert!(HostPort::parse("myhost").await.is_err());
        assert!(HostPort::parse("myhost:notaport").await.is_err());
        assert!(HostPort::parse("doesnotexist.invalid:1000").await.is_err());
    }

    #[tokio::test]
    async fn resolve_unbracketed_ipv6() -> anyhow::Result<()> {
        let hp = HostPort::resolve("::1", 50051).await?;
        assert_eq!(hp.addr(), "[::1]:50051".parse::<SocketAddr>()?);
        assert_eq!("[::1]:50051", hp.to_string());

        Ok(())
    }

    #[tokio::test]
    async fn display() -> anyhow::Result<()> {
        let hp = HostPort::parse("127.0.0.1:8000").await?;
        assert_eq!(format!("{hp}"), "127.0.0.1:8000");

        Ok(())
    }
}
