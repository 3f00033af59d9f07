use crate::address::{TargetAddr, parse_address_from_stream};
use crate::error::SessionError;
use crate::pool;
use crate::protocol::{AddressType, Command, MAX_BUF_SIZE, ReplyCode, Version};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Message pairs the status chosen for a connection request with the error
/// that produced it, if any
#[derive(Debug)]
pub struct Message {
    code: ReplyCode,
    err: Option<SessionError>,
}

/// Message implementation block
impl Message {
    /// success is the message for an established outbound connection
    pub fn success() -> Self {
        Self {
            code: ReplyCode::Succeeded,
            err: None,
        }
    }

    /// from_error picks the reply code matching `err`
    pub fn from_error(err: SessionError) -> Self {
        Self {
            code: err.reply_code(),
            err: Some(err),
        }
    }

    pub fn code(&self) -> ReplyCode {
        self.code
    }

    pub fn err(&self) -> Option<&SessionError> {
        self.err.as_ref()
    }

    pub fn into_err(self) -> Option<SessionError> {
        self.err
    }
}

/// parse_socks_request reads a full SOCKS5 request and returns the CONNECT
/// target. BIND, UDP ASSOCIATE and unknown commands are rejected without
/// dialing anything
pub async fn parse_socks_request<S>(stream: &mut S) -> Result<TargetAddr, SessionError>
where
    S: AsyncRead + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Instantiate a request buffer & read
    let mut buf = pool::acquire(MAX_BUF_SIZE, MAX_BUF_SIZE);
    stream.read_exact(&mut buf[..4]).await?;

    // Parse
    let version = buf[0];
    let command = buf[1];
    let atyp = buf[3];
    // Not retrieving RSV (RESERVED) -> 0x00

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(SessionError::UnsupportedVersion(version));
    }

    let command = Command::from_byte(command).ok_or(SessionError::UnsupportedCommand(command));

    // Without a known address type the rest of the request can't be framed
    let Some(addr_type) = AddressType::from_byte(atyp) else {
        return Err(match command {
            Ok(Command::Connect) => SessionError::UnsupportedAddressType(atyp),
            Ok(other) => SessionError::UnsupportedCommand(other as u8),
            Err(err) => err,
        });
    };

    // Read the whole request before rejecting so nothing is left unread
    let target = parse_address_from_stream(stream, addr_type, &mut buf).await?;

    match command? {
        Command::Connect => Ok(target),
        other => {
            debug!("rejecting {:?} to {}", other, target);
            Err(SessionError::UnsupportedCommand(other as u8))
        }
    }
}

/// send_reply writes the fixed 10 byte reply carrying `code`
pub async fn send_reply<S>(stream: &mut S, code: ReplyCode) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&code.reply()).await
}
