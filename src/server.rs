use crate::config::Config;
use crate::control::ControlOptions;
use crate::dial::Dialer;
use crate::iface::LocalAddr;
use crate::session::Session;
use crate::trace::TraceId;
use anyhow::{Result, anyhow, bail};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    config: Arc<Config>,
    listener: Option<TcpListener>,
    dialer: Option<Dialer>,
    trace_ip: Option<Ipv4Addr>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            listener: None,
            dialer: None,
            trace_ip: None,
        }
    }

    /// listen_addr is the wildcard address of the configured family and port
    pub fn listen_addr(&self) -> SocketAddr {
        let ip = if self.config.ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };

        SocketAddr::new(ip, self.config.port)
    }

    /// bind resolves the local address, prepares the dialer shared by all
    /// sessions and binds the listener. Fails when called twice
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("[ERR] bind can only be called once");
        }

        // Resolve where outbound connections originate from
        let local = match &self.config.iface {
            Some(name) => LocalAddr::for_interface(name)?,
            None => LocalAddr::unspecified(),
        };
        self.trace_ip = local.ip().or_else(LocalAddr::discover);

        // Build the pre-connect socket options
        let mut opts = ControlOptions::new();
        if let Some(iface) = local.iface() {
            opts = opts.bind_to_interface(iface.clone());
        }
        if self.config.reuse_addr {
            opts = opts.enable_reuse_addr();
        }
        if self.config.no_delay {
            opts = opts.enable_no_delay();
        }

        self.dialer = Some(Dialer::new(
            self.config.network,
            self.config.timeout,
            Arc::new(local),
            opts.build(),
        ));

        // Instantiate tokio listener
        let listen_addr = self.listen_addr();
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow!("[ERR] failed to listen on {listen_addr}: {e}"))?;
        let addr = listener.local_addr()?;

        // DEBUG
        info!("SOCKS5 proxy listening on {}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run accepts connections forever, one session task per client. Only
    /// a failed bind ends it
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }

        let (Some(listener), Some(dialer)) = (self.listener.take(), self.dialer.clone()) else {
            bail!("[ERR] server is already running");
        };
        let verbose = self.config.verbose;

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            // Clone for this connection
            let dialer = dialer.clone();
            let trace_id = TraceId::generate(self.trace_ip);
            let span = info_span!("session", trace_id = %trace_id, peer = %peer_addr);

            // Spawn async task
            tokio::spawn(
                async move {
                    // DEBUG
                    info!("new client: {}", peer_addr);

                    let session = Session::new(inbound, peer_addr, dialer, verbose);
                    if let Err(e) = session.start().await {
                        error!("connection error: {}", e);
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// start runs a server for `config` in the background. A fatal error is
/// delivered on `exit_tx`
pub fn start(exit_tx: mpsc::Sender<anyhow::Error>, config: Config) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut server = Socks5Server::new(config);

        if let Err(e) = server.run().await {
            if let Err(mpsc::error::SendError(e)) = exit_tx.send(e).await {
                error!("server stopped with nobody listening: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_follows_family() {
        let server = Socks5Server::new(Config::default());
        assert_eq!(server.listen_addr(), "0.0.0.0:10086".parse().unwrap());

        let server = Socks5Server::new(Config::default().with_port(1080).enable_ipv6());
        assert_eq!(server.listen_addr(), "[::]:1080".parse().unwrap());
    }

    #[tokio::test]
    async fn bind_twice_fails() {
        let mut server = Socks5Server::new(Config::default().with_port(0));
        let addr = server.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.bind().await.is_err());
    }

    #[tokio::test]
    async fn unknown_interface_fails_bind() {
        let mut server = Socks5Server::new(Config::default().with_port(0).with_iface("nosuchif0"));
        assert!(server.bind().await.is_err());
    }
}
