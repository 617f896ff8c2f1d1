//! Daemon binary for the numex server

use anyhow::Context as _;
use clap::Parser;
use futures_util::stream::StreamExt as _;
use numex_lib::metrics;
use numex_lib::model::ConfigError;
use numex_lib::server::WorkerPool;
use numex_lib::transport::hostport::HostPort;
use numex_lib::transport::security::{ServerSecurity, ServerTransport};
use numex_lib::transport::tcp::{self, DEFAULT_PORT, ServerOptions};
use numex_lib::utils::logging;
use prometheus::{IntCounter, register_int_counter};
use signal_hook_tokio::Signals;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::process;

/// Run the numex server in the foreground.
///
/// Answers every number it receives with a die roll of its own,
/// over plain TCP, TLS (--tls) or mutual TLS (--m-tls). Stop it with
/// SIGTERM.
///
/// By default, logs exchanges to stderr. To configure the output,
/// set the env variable RUST_LOG. Set the env variable
/// RUST_LOG_FORMAT=SYSTEMD to a systemd-friendly log output.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about, verbatim_doc_comment)]
struct Cli {
    /// Path to the PEM-encoded server certificate chain
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to the PEM-encoded server private key
    #[arg(long)]
    key: Option<PathBuf>,

    /// Path to the PEM-encoded CA that issues client certificates (mTLS)
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// IP address to listen on; all interfaces by default
    #[arg(long, default_value_t = IpAddr::V6(Ipv6Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Enable TLS; requires --cert and --key
    #[arg(long)]
    tls: bool,

    /// Enable mutual TLS; requires --cert, --key and --ca-cert
    #[arg(long = "m-tls")]
    m_tls: bool,

    /// Maximum number of requests handled at the same time
    #[arg(long, default_value_t = WorkerPool::DEFAULT_CAPACITY)]
    max_workers: usize,

    /// Address to export prometheus metrics (host:port, optional)
    #[arg(long)]
    metrics_addr: Option<String>,
}

lazy_static::lazy_static! {
    static ref METRIC_UP: IntCounter =
        register_int_counter!("numex_daemon_up", "Server is up").unwrap();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_with_info_modules(vec![module_path!(), "numex_lib"]);

    if let Err(err) = execute(cli).await {
        eprintln!("ERROR: {err:#}");
        process::exit(1);
    };
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let security = match ServerSecurity::from_flags(
        cli.tls,
        cli.m_tls,
        cli.ca_cert,
        cli.cert,
        cli.key,
    ) {
        Err(err @ ConfigError::MissingCredential {
            flag: "--cert" | "--key",
            ..
        }) => {
            log::error!("TLS is enabled, but certificate or key is missing");
            return Err(err.into());
        }
        res => res?,
    };
    let transport =
        ServerTransport::build(&security).context("Failed to set up transport security")?;

    if let Some(addr) = &cli.metrics_addr {
        let hostport = HostPort::parse(addr)
            .await
            .with_context(|| format!("Failed to parse --metrics-addr {addr}"))?;
        metrics::export_metrics(hostport.addr())
            .await
            .with_context(|| format!("Failed to export metrics on {addr}"))?;
    }

    let addr = SocketAddr::new(cli.bind, cli.port);
    log::debug!("Starting server on {addr}...");
    let server = tcp::start_server(
        addr,
        transport,
        ServerOptions {
            max_workers: cli.max_workers,
        },
    )
    .await
    .with_context(|| format!("Failed to start server on {addr}"))?;

    let mut signals = Signals::new([
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGQUIT,
    ])?;

    METRIC_UP.inc();
    let addr = server.local_addr();
    log::info!(
        "Server started on port {} {}...",
        addr.port(),
        if security.is_tls() {
            "with TLS"
        } else {
            "without TLS"
        }
    );
    if let ServerSecurity::MutualAuth { ca_cert, .. } = &security {
        log::info!(
            "Clients must present a certificate issued by {}",
            ca_cert.display()
        );
    }
    println!("Listening on {addr}");

    let _ = signals.next().await;

    log::info!("Interrupted. Shutting down..");
    signals.handle().close(); // A 2nd signal kills the process
    server.shutdown().await;

    Ok(())
}
