use anyhow::{Result, anyhow};
use clap::{ArgAction, Parser};
use socks5d::{Config, config::parse_duration, protocol::DEFAULT_PORT, server};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bind outbound connections to this network interface
    #[arg(short, long)]
    iface: Option<String>,

    /// Set SO_REUSEADDR and SO_REUSEPORT on outbound sockets
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    reuseaddr: bool,

    /// Set TCP_NODELAY on outbound sockets
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    nodelay: bool,

    /// Dial timeout, e.g. 500ms, 2s or 1m. 0 disables it
    #[arg(short, long, default_value = "1s", value_parser = parse_duration)]
    timeout: Duration,

    /// Outbound network: tcp or udp
    #[arg(short, long, default_value = "tcp")]
    network: String,

    /// Listen on the IPv6 wildcard address
    #[arg(long)]
    ipv6: bool,
}

/// Args implementation block
impl Args {
    /// into_config turns the parsed flags into a server configuration
    fn into_config(self) -> Config {
        let mut config = Config::default()
            .with_port(self.port)
            .with_network(&self.network)
            .with_timeout(self.timeout);

        if let Some(iface) = self.iface {
            config = config.with_iface(iface);
        }
        if self.verbose {
            config = config.enable_verbose();
        }
        if self.reuseaddr {
            config = config.enable_reuse_addr();
        }
        if self.nodelay {
            config = config.enable_no_delay();
        }
        if self.ipv6 {
            config = config.enable_ipv6();
        }

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = args.into_config();

    // DEBUG
    info!(
        "starting SOCKS5 proxy on port {} (network: {}, timeout: {:?})",
        config.port, config.network, config.timeout
    );

    // Run it
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let _server = server::start(exit_tx, config);

    tokio::select! {
        fatal = exit_rx.recv() => match fatal {
            Some(e) => Err(e),
            None => Err(anyhow!("[ERR] server stopped unexpectedly")),
        },
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socks5d::Network;

    #[test]
    fn defaults_enable_socket_options() {
        let config = Args::parse_from(["socks5d"]).into_config();
        assert_eq!(config.port, 10086);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.network, Network::Tcp);
        assert!(config.reuse_addr && config.no_delay);
        assert!(!config.verbose && !config.ipv6);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Args::parse_from([
            "socks5d",
            "-p",
            "1080",
            "-v",
            "-i",
            "eth0",
            "--reuseaddr",
            "false",
            "--nodelay=false",
            "-t",
            "500ms",
            "-n",
            "udp",
            "--ipv6",
        ])
        .into_config();

        assert_eq!(config.port, 1080);
        assert_eq!(config.iface.as_deref(), Some("eth0"));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.network, Network::Udp);
        assert!(!config.reuse_addr && !config.no_delay);
        assert!(config.verbose && config.ipv6);
    }
}
