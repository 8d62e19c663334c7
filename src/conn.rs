use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::config::Config;
use crate::handshake;
use crate::listener_stats::ListenerStats;
use crate::recorder::RecordingReader;
use crate::relay;

const RECORD_TYPE_ALERT: u8 = 21;
const ALERT_LEVEL_FATAL: u8 = 2;
/// Alert description for protocol, dial and replay failures.
pub const ALERT_INTERNAL_ERROR: u8 = 80;
/// Alert description for hostnames with no configured backend.
pub const ALERT_UNRECOGNIZED_NAME: u8 = 112;

/// One accepted client socket, paired with a backend once routing succeeds.
pub struct Connection {
    id: u64,
    client: TcpStream,
    remote: SocketAddr,
    local: SocketAddr,
    tls_minor: u8,
    hostname: String,
    backend: String,
}

impl Connection {
    pub fn new(id: u64, client: TcpStream, remote: SocketAddr, local: SocketAddr) -> Connection {
        Connection {
            id,
            client,
            remote,
            local,
            tls_minor: 0,
            hostname: String::new(),
            backend: String::new(),
        }
    }

    /// Sniff, route, dial, replay, then relay until both directions finish.
    /// Failures before the relay phase abort with a TLS alert; relay errors
    /// are transport level and only logged.
    pub async fn run(mut self, config: Arc<RwLock<Config>>, stats: Arc<ListenerStats>) {
        let mut recorder = RecordingReader::new(&mut self.client);
        let hello = handshake::extract_sni(&mut recorder).await;
        let replay = recorder.into_recorded();
        match hello {
            Ok(hello) => {
                self.tls_minor = hello.tls_minor;
                self.hostname = hello.hostname;
            }
            Err(cause) => {
                self.internal_error(format!("extracting SNI: {cause}")).await;
                return;
            }
        }

        let (backend, dial_timeout) = {
            let config = config.read().await;
            (config.match_host(&self.hostname), config.dial_timeout())
        };
        self.backend = match backend {
            Some(backend) => backend,
            None => {
                self.sni_failed(format!("no backend found for {:?}", self.hostname))
                    .await;
                return;
            }
        };

        self.log(format!("routing {:?} to {:?}", self.hostname, self.backend));
        let mut backend_stream =
            match timeout(dial_timeout, TcpStream::connect(&self.backend)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(cause)) => {
                    self.internal_error(format!(
                        "failed to dial backend {:?} for {:?}: {cause}",
                        self.backend, self.hostname
                    ))
                    .await;
                    return;
                }
                Err(_) => {
                    self.internal_error(format!(
                        "failed to dial backend {:?} for {:?}: timed out after {dial_timeout:?}",
                        self.backend, self.hostname
                    ))
                    .await;
                    return;
                }
            };

        // Replay the bytes consumed while sniffing before anything else
        // crosses to the backend.
        if let Err(cause) = backend_stream.write_all(&replay).await {
            self.internal_error(format!(
                "failed to replay handshake to {:?}: {cause}",
                self.backend
            ))
            .await;
            return;
        }
        stats.add_to_backend(replay.len());

        let (uploaded, downloaded) = relay::run(
            self.id,
            self.client,
            backend_stream,
            format!("{} -> {}", self.remote, self.backend),
            format!("{} -> {}", self.backend, self.remote),
            stats,
        )
        .await;
        info!(
            "{} {} <> {}: closed, {} bytes to backend, {} bytes to client",
            self.id,
            self.remote,
            self.local,
            uploaded + replay.len() as u64,
            downloaded
        );
    }

    fn log(&self, msg: String) {
        info!("{} {} <> {}: {}", self.id, self.remote, self.local, msg);
    }

    async fn internal_error(&mut self, msg: String) {
        self.abort(ALERT_INTERNAL_ERROR, msg).await;
    }

    async fn sni_failed(&mut self, msg: String) {
        self.abort(ALERT_UNRECOGNIZED_NAME, msg).await;
    }

    /// Send a fatal alert to the client best-effort and give up on the
    /// connection. Uses the minor version captured from the client's own
    /// record header, or 0 when the sniff never got that far.
    async fn abort(&mut self, description: u8, msg: String) {
        warn!("{} {} <> {}: {}", self.id, self.remote, self.local, msg);
        let alert = [
            RECORD_TYPE_ALERT,
            3,
            self.tls_minor,
            0,
            2,
            ALERT_LEVEL_FATAL,
            description,
        ];
        if let Err(cause) = self.client.write_all(&alert).await {
            warn!(
                "{} {} <> {}: error while sending alert: {cause}",
                self.id, self.remote, self.local
            );
        }
    }
}
