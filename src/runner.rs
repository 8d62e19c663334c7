use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::conn::Connection;
use crate::listener_stats::ListenerStats;

lazy_static! {
    static ref COUNTER: AtomicU64 = AtomicU64::new(0);
}

fn next_id() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

/// Accept loop over a single listening socket. Every accepted connection gets
/// its own task; a connection failing never affects the listener or other
/// connections.
pub struct Runner {
    listener: TcpListener,
    config: Arc<RwLock<Config>>,
    stats: Arc<ListenerStats>,
}

impl Runner {
    /// Bind is separate from run so callers (and tests) can learn the actual
    /// address before the accept loop takes over.
    pub async fn bind(bind: &str, config: Arc<RwLock<Config>>) -> Result<Runner> {
        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        info!("listening on {local}");
        Ok(Runner {
            listener,
            config,
            stats: Arc::new(ListenerStats::new(bind)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (socket, remote) = self.listener.accept().await?;
            let conn_id = next_id();
            let local = match socket.local_addr() {
                Ok(local) => local,
                Err(cause) => {
                    warn!("{conn_id} no local address for {remote}: {cause}");
                    continue;
                }
            };
            let config = Arc::clone(&self.config);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let active = stats.conn_opened();
                info!(
                    "{conn_id} new connection from {remote} active {active} total {}",
                    stats.total_count()
                );
                Connection::new(conn_id, socket, remote, local)
                    .run(config, Arc::clone(&stats))
                    .await;
                let active = stats.conn_closed();
                info!("{conn_id} connection done, active {active}");
            });
        }
    }
}
