use anyhow::Context as _;
use clap::Parser;
use console::style;
use numex_lib::client::exchange::{DEFAULT_INTERVAL, DEFAULT_RETRY_DELAY};
use numex_lib::client::{ExchangeLoop, ExchangeOptions, default_retry_strategy};
use numex_lib::metrics;
use numex_lib::model::ClientId;
use numex_lib::transport::hostport::HostPort;
use numex_lib::transport::security::ClientSecurity;
use numex_lib::transport::tcp::{ClientOptions, DEFAULT_PORT, TcpConnect};
use numex_lib::utils::logging;
use prometheus::{IntCounter, register_int_counter};
use std::path::PathBuf;
use std::process;

lazy_static::lazy_static! {
    static ref METRIC_UP: IntCounter =
        register_int_counter!("numex_cmd_up", "Command is up").unwrap();
}

/// Exchange random numbers with a numex server.
///
/// Sends a die roll to the server every --interval and logs the
/// server's answer. Connection failures are logged and retried every
/// --retry-delay, forever.
///
/// Logging can be further configured by setting the env var
/// RUST_LOG. For a systemd-friendly output format, set the env
/// var RUST_LOG_FORMAT=SYSTEMD
#[derive(Parser, Debug)]
#[command(author, version, about, long_about, verbatim_doc_comment)]
struct Cli {
    /// Host name or IP address of the server
    #[arg(long, default_value = "localhost")]
    host: String,

    /// TCP port of the server
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to the PEM-encoded CA that issued the server certificate
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to the PEM-encoded client certificate chain (mTLS)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to the PEM-encoded client private key (mTLS)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Enable TLS; requires --ca-cert
    #[arg(long)]
    tls: bool,

    /// Enable mutual TLS; requires --ca-cert, --cert and --key
    #[arg(long = "m-tls")]
    m_tls: bool,

    /// Name to check the server certificate against.
    ///
    /// Defaults to --host.
    #[arg(long)]
    server_name: Option<String>,

    /// Name sent to the server; a random one if unset
    #[arg(long)]
    client_id: Option<String>,

    /// Delay between two exchanges (e.g. "1s", "500ms")
    #[arg(long, default_value_t = DEFAULT_INTERVAL.into())]
    interval: humantime::Duration,

    /// Delay before reconnecting after a failure
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.into())]
    retry_delay: humantime::Duration,

    /// Maximum duration of a single exchange
    #[arg(long)]
    deadline: Option<humantime::Duration>,

    /// Stop after that many successful exchanges
    #[arg(long)]
    count: Option<u64>,

    /// Address to export prometheus metrics (host:port, optional)
    #[arg(long)]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_with_info_modules(vec![module_path!(), "numex_lib"]);

    if let Err(err) = execute(cli).await {
        print_error(&format!("{err:#}"));
        process::exit(1);
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let security =
        ClientSecurity::from_flags(cli.tls, cli.m_tls, cli.ca_cert, cli.cert, cli.key)?;

    if let Some(addr) = &cli.metrics_addr {
        let hostport = HostPort::parse(addr)
            .await
            .with_context(|| format!("Failed to parse --metrics-addr {addr}"))?;
        metrics::export_metrics(hostport.addr())
            .await
            .with_context(|| format!("Failed to export metrics on {addr}"))?;
    }
    METRIC_UP.inc();

    let client_id = cli
        .client_id
        .map(ClientId::from)
        .unwrap_or_else(ClientId::pick);
    log::info!(
        "Client {client_id} connecting to {}:{} {}",
        cli.host,
        cli.port,
        if security.is_tls() {
            "with TLS"
        } else {
            "without TLS"
        }
    );

    let connect = TcpConnect::new(
        cli.host,
        cli.port,
        security,
        ClientOptions {
            domain: cli.server_name,
        },
    );
    let exchange = ExchangeLoop::new(
        client_id,
        connect,
        default_retry_strategy(cli.retry_delay.into()),
        ExchangeOptions {
            interval: cli.interval.into(),
            deadline: cli.deadline.map(Into::into),
            max_exchanges: cli.count,
            ..Default::default()
        },
    );
    let report = exchange.run().await?;

    println!(
        "{}: {} exchange(s) over {} connection(s)",
        style("SUCCESS").for_stdout().green().bold(),
        report.exchanges,
        report.connections,
    );

    Ok(())
}

/// Print an error message to stderr, with standard format.
fn print_error(msg: &str) {
    eprintln!("{}: {}", style("ERROR").for_stderr().red().bold(), msg);
}
