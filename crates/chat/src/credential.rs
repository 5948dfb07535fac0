use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use selah_llm::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Answers whether a generation credential is currently available.
pub trait CredentialGate: Send + Sync {
    fn has_valid_credential(&self) -> bool;
}

/// Fixed or manually toggled credential state.
#[derive(Debug, Default)]
pub struct StaticCredential {
    valid: AtomicBool,
}

impl StaticCredential {
    pub fn new(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
        }
    }

    pub fn set(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

impl CredentialGate for StaticCredential {
    fn has_valid_credential(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

/// Source polled by [`CredentialWatch`].
pub trait CredentialProbe: Send + Sync {
    fn probe<'a>(&'a self) -> BoxFuture<'a, bool>;
}

/// Re-checks a probe on a fixed interval so a credential added later is picked up
/// without a restart.
pub struct CredentialWatch {
    valid: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl CredentialWatch {
    /// Starts polling. The first probe runs immediately.
    pub fn spawn(probe: Arc<dyn CredentialProbe>, interval: Duration) -> Self {
        let valid = Arc::new(AtomicBool::new(false));
        let shared = valid.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let now_valid = probe.probe().await;
                let was_valid = shared.swap(now_valid, Ordering::AcqRel);
                if now_valid != was_valid {
                    tracing::info!(valid = now_valid, "credential availability changed");
                }
            }
        });

        Self { valid, task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl CredentialGate for CredentialWatch {
    fn has_valid_credential(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl Drop for CredentialWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
