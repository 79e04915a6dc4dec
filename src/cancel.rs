use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GenomaError;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), GenomaError> {
        if self.is_cancelled() {
            Err(GenomaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
