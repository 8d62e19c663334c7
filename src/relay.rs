use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::listener_stats::ListenerStats;

const COPY_BUF_SIZE: usize = 4096;

/// Copy bytes from `reader` to `writer` until end-of-stream or error, then
/// half-close: shut down the destination's write side and drop the source's
/// read side. The opposite direction is never touched. Returns the number of
/// bytes copied.
pub fn pipe<R, W>(
    conn_id: u64,
    label: String,
    mut reader: R,
    mut writer: W,
    stats: Arc<ListenerStats>,
    to_backend: bool,
) -> JoinHandle<u64>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut copied: u64 = 0;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(cause) => {
                    warn!("{conn_id} {label}: read failed: {cause}");
                    break;
                }
            };
            if let Err(cause) = writer.write_all(&buf[..n]).await {
                warn!("{conn_id} {label}: write failed: {cause}");
                break;
            }
            copied += n as u64;
            if to_backend {
                stats.add_to_backend(n);
            } else {
                stats.add_to_client(n);
            }
        }
        if let Err(cause) = writer.shutdown().await {
            debug!("{conn_id} {label}: shutdown after copy: {cause}");
        }
        drop(reader);
        info!("{conn_id} {label}: ended after {copied} bytes");
        copied
    })
}

/// Split both streams and copy in both directions until each side has
/// finished. Returns (bytes copied to the backend, bytes copied to the
/// client), not counting the replayed handshake.
pub async fn run<A, B>(
    conn_id: u64,
    client: A,
    backend: B,
    upstream_label: String,
    downstream_label: String,
    stats: Arc<ListenerStats>,
) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);
    let up = pipe(
        conn_id,
        upstream_label,
        client_read,
        backend_write,
        Arc::clone(&stats),
        true,
    );
    let down = pipe(
        conn_id,
        downstream_label,
        backend_read,
        client_write,
        stats,
        false,
    );
    let uploaded = up.await.unwrap_or(0);
    let downloaded = down.await.unwrap_or(0);
    (uploaded, downloaded)
}
