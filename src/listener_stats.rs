use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-listener counters, shared by the accept loop and every relay task.
#[derive(Debug)]
pub struct ListenerStats {
    pub name: String,
    total: AtomicUsize,
    active: AtomicUsize,
    to_backend_bytes: AtomicUsize,
    to_client_bytes: AtomicUsize,
}

impl ListenerStats {
    pub fn new(name: &str) -> ListenerStats {
        ListenerStats {
            name: name.into(),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            to_backend_bytes: AtomicUsize::new(0),
            to_client_bytes: AtomicUsize::new(0),
        }
    }

    pub fn conn_opened(&self) -> usize {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn conn_closed(&self) -> usize {
        self.active.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn add_to_backend(&self, count: usize) {
        self.to_backend_bytes.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_to_client(&self, count: usize) {
        self.to_client_bytes.fetch_add(count, Ordering::SeqCst);
    }

    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn to_backend_bytes(&self) -> usize {
        self.to_backend_bytes.load(Ordering::SeqCst)
    }

    pub fn to_client_bytes(&self) -> usize {
        self.to_client_bytes.load(Ordering::SeqCst)
    }

    /// One-line summary for the periodic stats reporter.
    pub fn summary(&self) -> String {
        format!(
            "{}: active {} total {} to-backend {}B to-client {}B",
            self.name,
            self.active_count(),
            self.total_count(),
            self.to_backend_bytes(),
            self.to_client_bytes()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_connections_and_bytes() {
        let stats = ListenerStats::new("test");
        assert_eq!(stats.conn_opened(), 1);
        assert_eq!(stats.conn_opened(), 2);
        assert_eq!(stats.conn_closed(), 1);
        stats.add_to_backend(100);
        stats.add_to_client(40);
        assert_eq!(stats.total_count(), 2);
        assert_eq!(stats.active_count(), 1);
        assert_eq!(stats.to_backend_bytes(), 100);
        assert_eq!(stats.to_client_bytes(), 40);
    }
}
