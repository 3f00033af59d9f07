//! One proxied client connection
//!
//! ```text
//! AwaitingAuth -> AwaitingRequest -> Dialing -> Relaying -> Closed
//!       \               \               \
//!        +---------------+---------------+----> Failed
//! ```

use crate::auth;
use crate::commands::{self, Message};
use crate::dial::Dialer;
use crate::error::SessionError;
use crate::pool;
use crate::protocol::MAX_BUF_SIZE;
use crate::relay;
use anyhow::{Result, anyhow, bail};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Upper bound on unparsed request bytes discarded before closing
const MAX_DRAIN: usize = 64 * 1024;

/// SessionState tracks how far a session got through the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingAuth,
    AwaitingRequest,
    Dialing,
    Relaying,
    Closed,
    Failed,
}

/// Session owns the client connection and, once dialed, the destination
/// connection. It is driven by a single task
#[derive(Debug)]
pub struct Session {
    local: TcpStream,
    remote: Option<TcpStream>,
    peer: SocketAddr,
    dialer: Dialer,
    verbose: bool,
    state: SessionState,
}

/// Session implementation block
impl Session {
    /// new is a constructor for the Session type
    pub fn new(local: TcpStream, peer: SocketAddr, dialer: Dialer, verbose: bool) -> Self {
        Self {
            local,
            remote: None,
            peer,
            dialer,
            verbose,
            state: SessionState::AwaitingAuth,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// start runs the session to completion: auth, connect, then relay
    /// until both directions finish. Any failure closes the client
    /// connection before the error is returned
    pub async fn start(mut self) -> Result<()> {
        if let Err(e) = self.handshake().await {
            self.close().await;
            return Err(anyhow!("[ERR] session with {} failed: {e}", self.peer));
        }

        let (upstream, downstream) = self.relay()?;
        let (sent, received) = tokio::join!(upstream, downstream);

        // DEBUG
        debug!(
            "connection closed: {} bytes from client, {} bytes from server",
            sent.unwrap_or_default(),
            received.unwrap_or_default()
        );

        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.auth().await?;
        self.connect().await
    }

    /// auth negotiates the authentication method with the client
    pub async fn auth(&mut self) -> Result<(), SessionError> {
        match auth::negotiate_auth(&mut self.local).await {
            Ok(()) => {
                if self.verbose {
                    trace!("auth negotiated with {}", self.peer);
                }
                self.state = SessionState::AwaitingRequest;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// connect reads the request, dials the destination and writes exactly
    /// one reply. The destination connection is kept only when the reply
    /// reports success
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let message = match commands::parse_socks_request(&mut self.local).await {
            Ok(target) => {
                self.state = SessionState::Dialing;
                if self.verbose {
                    trace!("dialing {} for {}", target, self.peer);
                }

                match self.dialer.dial(&target).await {
                    Ok(remote) => {
                        self.remote = Some(remote);
                        Message::success()
                    }
                    Err(e) => Message::from_error(e),
                }
            }
            Err(e) => Message::from_error(e),
        };

        if self.verbose {
            trace!("replying {:?} to {}", message.code(), self.peer);
        }

        if let Err(e) = commands::send_reply(&mut self.local, message.code()).await {
            self.remote = None;
            self.state = SessionState::Failed;
            return Err(e.into());
        }

        match message.into_err() {
            None => Ok(()),
            Some(e) => {
                self.remote = None;
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// relay hands both connections to the relay tasks. Only valid after a
    /// successful connect
    pub fn relay(mut self) -> Result<(JoinHandle<u64>, JoinHandle<u64>)> {
        let Some(remote) = self.remote.take() else {
            bail!("[ERR] no destination connection to relay for {}", self.peer);
        };

        self.state = SessionState::Relaying;
        Ok(relay::relay(self.local, remote, self.verbose))
    }

    /// close shuts down the client connection and drops the destination
    /// connection if one was opened
    pub async fn close(&mut self) {
        if self.verbose {
            warn!("closing connection from {}", self.peer);
        }

        let drained = self.drain_pending();
        if drained > 0 {
            debug!("discarded {} unread bytes from {}", drained, self.peer);
        }

        if let Err(e) = self.local.shutdown().await {
            debug!("shutdown {} failed: {}", self.peer, e);
        }
        self.remote = None;

        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    /// drain_pending discards bytes the client already sent but that were
    /// never parsed, without waiting for more. Closing a socket with unread
    /// data resets the connection and can destroy the reply in flight
    fn drain_pending(&mut self) -> usize {
        let mut buf = pool::acquire(MAX_BUF_SIZE, MAX_BUF_SIZE);
        let mut drained = 0;

        while drained < MAX_DRAIN {
            match self.local.try_read(&mut buf[..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Control;
    use crate::iface::LocalAddr;
    use crate::protocol::{Network, ReplyCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn session() -> (TcpStream, Session) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (local, peer) = accepted.unwrap();

        let dialer = Dialer::new(
            Network::Tcp,
            Duration::from_secs(1),
            Arc::new(LocalAddr::unspecified()),
            Control::default(),
        );
        (client.unwrap(), Session::new(local, peer, dialer, true))
    }

    async fn read_reply(client: &mut TcpStream) -> [u8; 10] {
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn auth_advances_state() {
        let (mut client, mut session) = session().await;
        assert_eq!(session.state(), SessionState::AwaitingAuth);

        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
        session.auth().await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingRequest);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn bad_version_fails_auth() {
        let (mut client, mut session) = session().await;

        client.write_all(&[0x04, 0x01]).await.unwrap();
        assert!(session.auth().await.is_err());
        assert_eq!(session.state(), SessionState::Failed);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn connect_keeps_remote_on_success() {
        let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = destination.local_addr().unwrap().port();
        let (mut client, mut session) = session().await;

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&port.to_be_bytes());
        client.write_all(&request).await.unwrap();

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Dialing);
        assert!(session.remote.is_some());
        assert_eq!(read_reply(&mut client).await, ReplyCode::Succeeded.reply());

        let (upstream, downstream) = session.relay().unwrap();
        let (mut remote, _) = destination.accept().await.unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(client);
        drop(remote);
        assert_eq!(upstream.await.unwrap(), 2);
        assert_eq!(downstream.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bind_is_rejected_without_remote() {
        let (mut client, mut session) = session().await;

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedCommand(0x02)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.remote.is_none());
        assert_eq!(read_reply(&mut client).await, ReplyCode::CommandNotSupported.reply());

        session.close().await;
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn refused_dial_is_reported() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let (mut client, mut session) = session().await;
        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&port.to_be_bytes());
        client.write_all(&request).await.unwrap();

        assert!(session.connect().await.is_err());
        assert!(session.remote.is_none());
        assert_eq!(read_reply(&mut client).await, ReplyCode::ConnectionRefused.reply());
        assert!(session.relay().is_err());
    }

    #[tokio::test]
    async fn unknown_address_type_closes_cleanly() {
        let (mut client, mut session) = session().await;

        // Address and port bytes after an unknown ATYP are never parsed
        client
            .write_all(&[0x05, 0x01, 0x00, 0x05, 1, 2, 3, 4, 0, 80])
            .await
            .unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedAddressType(0x05)));

        assert_eq!(session.drain_pending(), 6);
        session.close().await;
        drop(session);

        assert_eq!(read_reply(&mut client).await, ReplyCode::AddrTypeUnsupported.reply());
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close_marks_closed() {
        let (mut client, mut session) = session().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
