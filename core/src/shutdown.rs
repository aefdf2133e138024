use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cooperative stop signal paired with non-cancellable critical sections.
///
/// Long running work polls [`Shutdown::token`] and stops at the next unit
/// boundary. Work that must never be interrupted half way (persisting
/// metadata) runs while holding a [`CriticalSection`]; [`Shutdown::trigger`]
/// returns only after every section has been released.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    gate: Arc<RwLock<()>>,
}

/// Held for the duration of a non-cancellable step. Cloning re-enters the
/// same section.
#[derive(Clone)]
pub struct CriticalSection {
    _guard: Arc<OwnedRwLockReadGuard<()>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Enters a critical section, or returns `None` once shutdown began.
    pub async fn lock(&self) -> Option<CriticalSection> {
        if self.token.is_cancelled() {
            return None;
        }
        let guard = self.gate.clone().read_owned().await;
        if self.token.is_cancelled() {
            return None;
        }
        Some(CriticalSection {
            _guard: Arc::new(guard),
        })
    }

    /// Signals cancellation, then waits for open critical sections.
    pub async fn trigger(&self) {
        self.token.cancel();
        info!("Shutdown requested, waiting for critical sections");
        let _exclusive = self.gate.write().await;
        info!("Critical sections finished");
    }
}
