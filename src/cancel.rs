// Cooperative cancellation. A token is threaded through every stage; the
// stored CANCEL_REQUESTED flag is bridged onto it by a watcher task so a
// separate process can stop a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::db::LeadStore;
use crate::models::ResearchStatus;

#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this token
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Tokens of the runs active in this process, keyed by (user, resume).
#[derive(Default)]
pub struct ResearchRegistry {
    active: Mutex<HashMap<(String, String), CancelToken>>,
}

impl ResearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user: &str, resume: &str) -> CancelToken {
        let token = CancelToken::new();
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.insert((user.to_string(), resume.to_string()), token.clone()) {
                // A forced restart supersedes the earlier run
                previous.cancel();
            }
        }
        token
    }

    pub fn cancel(&self, user: &str, resume: &str) -> bool {
        match self.active.lock() {
            Ok(active) => match active.get(&(user.to_string(), resume.to_string())) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Removes the entry if it still belongs to `token`. Returns false when
    /// a newer run has taken the slot.
    pub fn finish(&self, user: &str, resume: &str, token: &CancelToken) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        let key = (user.to_string(), resume.to_string());
        if active.get(&key).is_some_and(|t| Arc::ptr_eq(&t.tx, &token.tx)) {
            active.remove(&key);
            true
        } else {
            false
        }
    }
}

/// Polls the stored research status and cancels `token` once a
/// CANCEL_REQUESTED flag appears. Exits when the token is cancelled.
pub fn watch_store(
    store: Arc<LeadStore>,
    user: String,
    resume: String,
    token: CancelToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match store.research_status(&user, &resume) {
                Ok(ResearchStatus::CancelRequested) => {
                    info!("Cancellation requested for {}/{}", user, resume);
                    token.cancel();
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!("Cancel watcher could not read status: {}", e),
            }
        }
    })
}
