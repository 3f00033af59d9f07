//! Outbound dialing
//!
//! The destination is resolved before any socket exists, so the socket
//! family, the interface binding and the source address all follow the
//! address actually being dialed.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::address::TargetAddr;
use crate::control::Control;
use crate::error::SessionError;
use crate::iface::LocalAddr;
use crate::protocol::Network;

/// Dialer opens outbound connections with the socket options, source
/// address and timeout shared by every session of a server
#[derive(Debug, Clone)]
pub struct Dialer {
    network: Network,
    timeout: Duration,
    local: Arc<LocalAddr>,
    control: Control,
}

impl Dialer {
    /// new builds a dialer. A zero `timeout` disables the dial deadline
    pub fn new(
        network: Network,
        timeout: Duration,
        local: Arc<LocalAddr>,
        control: Control,
    ) -> Self {
        Self {
            network,
            timeout,
            local,
            control,
        }
    }

    /// dial connects to `target`, trying each resolved address in order.
    /// No retries are made beyond that
    pub async fn dial(&self, target: &TargetAddr) -> Result<TcpStream, SessionError> {
        if self.network != Network::Tcp {
            return Err(SessionError::UnsupportedNetwork(self.network));
        }

        let attempt = self.dial_tcp(target);
        let result = if self.timeout.is_zero() {
            attempt.await
        } else {
            match timeout(self.timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial timed out after {:?}", self.timeout),
                )),
            }
        };

        let stream = result.map_err(|source| SessionError::Dial {
            target: target.to_string(),
            source,
        })?;

        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            warn!("set SO_KEEPALIVE failed: {}", e);
        }

        Ok(stream)
    }

    async fn dial_tcp(&self, target: &TargetAddr) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in target.resolve().await? {
            match self.connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::HostUnreachable, format!("no address for {target}"))
        }))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(..) => TcpSocket::new_v4()?,
            SocketAddr::V6(..) => TcpSocket::new_v6()?,
        };

        self.control.apply(&socket, addr);

        // Source address is IPv4 only, so it never applies to IPv6 targets
        if let (Some(ip), SocketAddr::V4(..)) = (self.local.ip(), addr) {
            socket.bind(SocketAddr::new(IpAddr::V4(ip), 0))?;
        }

        socket.connect(addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlOptions;
    use crate::protocol::ReplyCode;
    use tokio::net::TcpListener;

    fn dialer(network: Network, timeout: Duration) -> Dialer {
        Dialer::new(
            network,
            timeout,
            Arc::new(LocalAddr::unspecified()),
            ControlOptions::new().enable_no_delay().build(),
        )
    }

    #[tokio::test]
    async fn dials_literal_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dialer(Network::Tcp, Duration::from_secs(1))
            .dial(&TargetAddr::Ip(addr))
            .await
            .unwrap();

        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn dials_domain_across_families() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // localhost may resolve to ::1 first, which has no listener
        let stream = dialer(Network::Tcp, Duration::ZERO)
            .dial(&TargetAddr::Domain("localhost".to_string(), port))
            .await
            .unwrap();

        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn refused_dial_maps_to_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dialer(Network::Tcp, Duration::from_secs(1))
            .dial(&TargetAddr::Ip(addr))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Dial { .. }));
        assert_eq!(err.reply_code(), ReplyCode::ConnectionRefused);
    }

    #[tokio::test]
    async fn udp_network_is_not_dialed() {
        let err = dialer(Network::Udp, Duration::from_secs(1))
            .dial(&TargetAddr::Ip("127.0.0.1:53".parse().unwrap()))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::UnsupportedNetwork(Network::Udp)));
    }

    #[tokio::test]
    async fn source_address_is_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        #[cfg(target_os = "linux")]
        let local = LocalAddr::for_interface("lo").unwrap();
        #[cfg(not(target_os = "linux"))]
        let local = LocalAddr::unspecified();

        let dialer = Dialer::new(
            Network::Tcp,
            Duration::from_secs(1),
            Arc::new(local),
            Control::default(),
        );
        let stream = dialer.dial(&TargetAddr::Ip(addr)).await.unwrap();
        assert!(stream.local_addr().unwrap().ip().is_loopback());
    }
}
