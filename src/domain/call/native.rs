//! Native call system port

use crate::domain::call::command::{CallReport, Command};

/// Outbound port towards the native telephony/media stack.
///
/// Dispatch is fire-and-forget: the native side reports the outcome later as a
/// regular native event (e.g. `joined-meeting` after a `Join`).
#[cfg_attr(test, mockall::automock)]
pub trait NativeCallSystem: Send + Sync {
    /// Hand a validated command to the native stack
    fn send_command(&self, command: Command);

    /// Tell the platform's call system that the call started, failed or ended
    fn report_call(&self, report: CallReport);
}
