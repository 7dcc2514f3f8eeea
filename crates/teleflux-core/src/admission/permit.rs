//! RAII permit that returns its admission slot when dropped.

use super::AdmissionController;

/// Held by a job for as long as it is admitted. Dropping it (normal exit,
/// cancellation, or panic unwinding) releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    pub(super) controller: &'a AdmissionController,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.controller.release();
    }
}
