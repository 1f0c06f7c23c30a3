use crate::models::error::DeviceFault;
use crate::models::state::{TransferOutcome, TransferState};
use crate::processing::trigger::TriggerEvent;

/// Event delegate for poll-driven transfer notifications.
///
/// All methods are called from the thread running the transfer loop.
/// Implementations should hand work off rather than block the loop.
pub trait TransferDelegate: Send + Sync {
    /// Called on every loop state transition.
    fn on_state_changed(&self, _state: &TransferState) {}

    /// Called after a transient fault was recovered.
    fn on_fault_recovered(&self, _fault: &DeviceFault) {}

    /// Called once when the trigger level is crossed.
    fn on_trigger(&self, _event: &TriggerEvent) {}

    /// Called when the loop exits without error.
    fn on_finished(&self, _outcome: TransferOutcome) {}
}
