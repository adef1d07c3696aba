//! Shutdown coordination.
//!
//! One `Shutdown` per router; any number of `ShutdownSignal`s. The first
//! trigger wins and carries the drain deadline every subscriber sees.

use std::time::Duration;

use tokio::sync::watch;

/// Owner side of the shutdown channel.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<Option<Duration>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown with `deadline` for draining. Returns false when
    /// shutdown was already requested; the first deadline stays in force.
    pub fn trigger(&self, deadline: Duration) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(deadline);
            true
        })
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side, handed to the accept loop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<Duration>>,
}

impl ShutdownSignal {
    /// Resolve once shutdown is requested, yielding the drain deadline.
    ///
    /// A dropped `Shutdown` counts as an immediate stop.
    pub async fn triggered(&mut self) -> Duration {
        match self.rx.wait_for(|deadline| deadline.is_some()).await {
            Ok(deadline) => deadline.unwrap_or_default(),
            Err(_) => Duration::ZERO,
        }
    }
}
