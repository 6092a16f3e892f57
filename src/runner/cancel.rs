//! Interrupt handling
//!
//! SIGINT/SIGTERM set a shared flag. Running commands poll it and pass a
//! SIGTERM on to their process group, and the executor refuses to start
//! further tasks.

use crate::error::EXIT_INTERRUPTED;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Route SIGINT/SIGTERM to this token
    ///
    /// A second signal while already cancelling exits immediately.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                std::process::exit(EXIT_INTERRUPTED);
            }
            tracing::warn!("interrupt received, stopping");
            token.cancel();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
