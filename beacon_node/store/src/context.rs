//! Cooperative cancellation threaded through long-running operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation handle checked at operation entry.
///
/// Operations observe cancellation only at their suspension points, so a
/// cancelled context never leaves a partial commit behind: either the
/// operation had not started writing, or it runs to completion.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child sharing this context's cancellation signal.
    pub fn child(&self) -> Self {
        Self {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Guard for use at suspension points.
    pub fn check(&self) -> Result<(), crate::errors::Error> {
        if self.is_cancelled() {
            Err(crate::errors::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_propagates_to_children() {
        let ctx = Context::new();
        let child = ctx.child();
        assert!(child.check().is_ok());
        ctx.cancel();
        assert!(child.is_cancelled());
        assert!(child.check().is_err());
    }
}
