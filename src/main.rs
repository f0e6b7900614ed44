use std::io::stderr;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ursa_server::{AddrRange, Config};
use ursa_types::{Cidr, Ipv4};

/// Network-bootstrap service for bare-metal hosts: DHCP, TFTP and HTTP
/// over one lease store.
#[derive(Parser, Debug)]
#[command(name = "ursa", version, about)]
struct Cli {
    /// SQLite connection string
    #[arg(long, default_value = "sqlite:ursa.db?cache=shared")]
    dsn: String,

    /// Interface to serve DHCP on
    #[arg(long, default_value = "eth0")]
    iface: String,

    /// Management allocation range, inclusive
    #[arg(long = "dhcp-range", default_value = "192.0.2.100:192.0.2.200", value_name = "START:END")]
    dhcp_range: AddrRange,

    /// Service subnet CIDR
    #[arg(long = "service-nw", default_value = "198.51.100.0/24")]
    service_nw: Cidr,

    /// Service allocation range, inclusive
    #[arg(long = "service-range", default_value = "198.51.100.100:198.51.100.200", value_name = "START:END")]
    service_range: AddrRange,

    /// Service gateway
    #[arg(long = "service-gw", default_value = "198.51.100.1")]
    service_gw: Ipv4,

    /// Service DNS server
    #[arg(long = "service-dns", default_value = "8.8.8.8")]
    service_dns: Ipv4,

    /// Prefix for generated host names
    #[arg(long = "hostname-prefix", default_value = "cn")]
    hostname_prefix: String,

    /// HTTP static root (also holds the TFTP boot assets)
    #[arg(long = "static-dir", default_value = "./static")]
    static_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("ursa={default_level},sqlx=warn,tower=warn,hyper=warn"))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .init();

    let config = Config {
        dsn: cli.dsn,
        iface: cli.iface,
        dhcp_range: cli.dhcp_range,
        service_network: cli.service_nw,
        service_range: cli.service_range,
        service_gateway: cli.service_gw,
        service_dns: cli.service_dns,
        hostname_prefix: cli.hostname_prefix,
        static_dir: cli.static_dir,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    if let Err(e) = runtime.block_on(ursa_server::run(config)) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
