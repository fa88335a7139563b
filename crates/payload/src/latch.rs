//! One-shot completion gate.
//!
//! A parse has several sources able to finish it: the pipeline itself, the
//! timeout timer, the client abort signal. Each of them reports through
//! [`Latch::settle`]; the first report is kept and every later one is dropped.

use once_cell::sync::OnceCell;
use tracing::trace;

#[derive(Debug)]
pub(crate) struct Latch<T> {
    outcome: OnceCell<T>,
}

impl<T> Latch<T> {
    pub(crate) fn new() -> Self {
        Self { outcome: OnceCell::new() }
    }

    /// Moves the latch from pending to settled.
    ///
    /// Returns `false` when another source already settled it, `outcome` is dropped in that case.
    pub(crate) fn settle(&self, outcome: T) -> bool {
        match self.outcome.set(outcome) {
            Ok(()) => true,
            Err(_late) => {
                trace!("latch already settled, dropping late outcome");
                false
            }
        }
    }

    pub(crate) fn into_outcome(self) -> Option<T> {
        self.outcome.into_inner()
    }
}
