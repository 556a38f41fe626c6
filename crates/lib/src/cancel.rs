//! Cooperative cancellation.
//!
//! A job hands the same token to every long-running operation it drives. Operations
//! poll it at their checkpoints and unwind with their own "canceled" error; nothing is
//! interrupted preemptively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_canceled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}
