//! Error types for a single proxied session
//!
//! Every failure a session can hit resolves to exactly one SOCKS5 reply
//! code through [`SessionError::reply_code`].

use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::protocol::{Network, ReplyCode};

/// SessionError covers protocol violations and I/O failures of one session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Client spoke something other than SOCKS5
    #[error("unsupported socks version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// BIND, UDP ASSOCIATE or an unknown command
    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// Address type outside IPv4, domain name and IPv6
    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Outbound network family that cannot be dialed
    #[error("unsupported network type: {0}")]
    UnsupportedNetwork(Network),

    /// Domain name bytes were not valid UTF-8
    #[error("invalid domain name: {0}")]
    InvalidDomain(#[from] FromUtf8Error),

    /// Outbound connection could not be established
    #[error("failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Read or write on the client connection failed
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// reply_code maps the error onto the status byte sent to the client
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            SessionError::UnsupportedCommand(_) => ReplyCode::CommandNotSupported,
            SessionError::UnsupportedAddressType(_) => ReplyCode::AddrTypeUnsupported,
            SessionError::InvalidDomain(_) => ReplyCode::HostUnreachable,
            SessionError::Dial { source, .. } => dial_reply_code(source),
            SessionError::UnsupportedVersion(_)
            | SessionError::UnsupportedNetwork(_)
            | SessionError::Io(_) => ReplyCode::ServerFailure,
        }
    }
}

/// dial_reply_code classifies a dial failure. Anything unclassified is a
/// general server failure
fn dial_reply_code(err: &io::Error) -> ReplyCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
        io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
        io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
        io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
        _ => ReplyCode::ServerFailure,
    }
}
