use crate::pool;
use crate::protocol::DEFAULT_BUF_SIZE;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, trace};

/// relay spawns one copy task per direction between the client and the
/// destination and returns immediately. Each task stops at end-of-stream
/// or on the first error; when a task ends its write half is dropped,
/// which shuts down that direction only
pub fn relay(
    client: TcpStream,
    remote: TcpStream,
    verbose: bool,
) -> (JoinHandle<u64>, JoinHandle<u64>) {
    let client_addr = peer_name(&client);
    let remote_addr = peer_name(&remote);

    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    // Client -> destination
    let upstream = tokio::spawn(
        forward(
            client_read,
            remote_write,
            format!("{client_addr}->{remote_addr}"),
            verbose,
        )
        .in_current_span(),
    );

    // Destination -> client
    let downstream = tokio::spawn(
        forward(
            remote_read,
            client_write,
            format!("{remote_addr}->{client_addr}"),
            verbose,
        )
        .in_current_span(),
    );

    (upstream, downstream)
}

/// forward runs one direction of the relay and reports how it ended
async fn forward<R, W>(mut reader: R, mut writer: W, direction: String, verbose: bool) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match copy_pooled(&mut reader, &mut writer).await {
        Ok(copied) => {
            if verbose {
                trace!("[{}] forward success. copy size: {}", direction, copied);
            }
            copied
        }
        Err(e) => {
            error!("[{}] forward error: {}", direction, e);
            0
        }
    }
}

/// copy_pooled copies `reader` into `writer` until end-of-stream through a
/// 32 KiB pooled buffer. The buffer goes back to the pool however the copy
/// ends
pub async fn copy_pooled<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = pool::acquire(DEFAULT_BUF_SIZE, DEFAULT_BUF_SIZE);
    let mut copied = 0u64;

    loop {
        let n = reader.read(&mut buf[..]).await?;
        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    writer.flush().await?;
    Ok(copied)
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
