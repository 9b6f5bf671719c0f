use std::fmt;

/// Per-resource reconciliation state.
///
/// `Observed -> Converging -> Converged`, or `Converging -> Failed` followed
/// by a backoff and another `Converging` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// A desired state arrived and has not been acted on yet
    Observed,
    /// Hypervisor calls are in flight
    Converging,
    /// Actual state matches the last desired state and status was reported
    Converged,
    /// The last attempt failed; `attempts` counts consecutive failures
    Failed { attempts: u32 },
    /// The resource was deleted and its hypervisor objects torn down
    Removed,
}

impl ReconcileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Observed => "observed",
            ReconcileState::Converging => "converging",
            ReconcileState::Converged => "converged",
            ReconcileState::Failed { .. } => "failed",
            ReconcileState::Removed => "removed",
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ReconcileState::Failed { attempts } => write!(f, "failed ({attempts} attempts)"),
            other => f.write_str(other.as_str()),
        }
    }
}
