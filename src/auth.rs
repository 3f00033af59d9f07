use crate::error::SessionError;
use crate::pool;
use crate::protocol::{AuthMethod, MIN_BUF_SIZE, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// negotiate_auth handles authentication negotiation between the SOCKS server and client.
/// The offered methods are read but not evaluated: "no authentication required" is always selected
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    // Instantiate handshake buffer & read
    let mut buf = pool::acquire(MIN_BUF_SIZE, MIN_BUF_SIZE);
    stream.read_exact(&mut buf[..2]).await?;

    // Parse version and client methods from handshake
    let version = buf[0];
    let n_methods = buf[1] as usize;

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        // Session is torn down either way, the reply is best effort
        let _ = stream
            .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8])
            .await;
        return Err(SessionError::UnsupportedVersion(version));
    }

    // Drain the method list
    stream.read_exact(&mut buf[..n_methods]).await?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream
        .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAuth as u8])
        .await?;

    Ok(())
}
