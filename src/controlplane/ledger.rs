//! Rollback Ledger
//!
//! Undo actions recorded after each successful create. Unwinding replays them
//! newest first, ordered by the array's referential constraints: volume
//! connections, then volumes, then hosts, then host groups.

use crate::controlplane::guard::CallGuard;
use crate::domain::ports::StorageArrayApi;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

// =============================================================================
// Undo Actions
// =============================================================================

/// Compensation for one create on the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UndoAction {
    DisconnectVolume { volume: String, group: String },
    /// Destroy then eradicate
    DeleteVolume { name: String },
    DeleteHost { name: String },
    DeleteHostGroup { name: String },
}

impl UndoAction {
    /// Lower ranks unwind first
    fn rank(&self) -> u8 {
        match self {
            UndoAction::DisconnectVolume { .. } => 0,
            UndoAction::DeleteVolume { .. } => 1,
            UndoAction::DeleteHost { .. } => 2,
            UndoAction::DeleteHostGroup { .. } => 3,
        }
    }

    async fn apply(&self, array: &dyn StorageArrayApi, guard: &CallGuard) -> Result<()> {
        match self {
            UndoAction::DisconnectVolume { volume, group } => {
                guard
                    .call(
                        "disconnect_volume_from_group",
                        array.disconnect_volume_from_group(volume, group),
                    )
                    .await
            }
            UndoAction::DeleteVolume { name } => {
                guard
                    .call("delete_volume", array.delete_volume(name, false))
                    .await?;
                guard
                    .call("eradicate_volume", array.delete_volume(name, true))
                    .await
            }
            UndoAction::DeleteHost { name } => {
                guard.call("delete_host", array.delete_host(name)).await
            }
            UndoAction::DeleteHostGroup { name } => {
                guard
                    .call("delete_host_group", array.delete_host_group(name))
                    .await
            }
        }
    }
}

impl fmt::Display for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoAction::DisconnectVolume { volume, group } => {
                write!(f, "disconnect volume {} from {}", volume, group)
            }
            UndoAction::DeleteVolume { name } => write!(f, "delete volume {}", name),
            UndoAction::DeleteHost { name } => write!(f, "delete host {}", name),
            UndoAction::DeleteHostGroup { name } => write!(f, "delete host group {}", name),
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Outcome of an unwind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub undone: Vec<UndoAction>,
    /// Actions that failed, with the error rendered
    pub failed: Vec<(UndoAction, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered record of compensations for one run
#[derive(Debug, Clone, Default)]
pub struct RollbackLedger {
    actions: Vec<UndoAction>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the compensation for a create that just succeeded
    pub fn record(&mut self, action: UndoAction) {
        debug!(action = %action, "Recorded undo action");
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Order the actions will run in
    pub fn unwind_order(&self) -> Vec<UndoAction> {
        let mut order: Vec<UndoAction> = self.actions.iter().rev().cloned().collect();
        order.sort_by_key(UndoAction::rank);
        order
    }

    /// Run every action, best-effort. Failures are logged and reported; they
    /// do not stop later actions.
    pub async fn unwind(self, array: &dyn StorageArrayApi, guard: &CallGuard) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.is_empty() {
            return report;
        }

        info!(actions = self.len(), "Rolling back");
        for action in self.unwind_order() {
            match action.apply(array, guard).await {
                Ok(()) => {
                    debug!(action = %action, "Undo succeeded");
                    report.undone.push(action);
                }
                Err(e) => {
                    warn!(action = %action, error = %e, "Undo failed");
                    report.failed.push((action, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::SimulatedArray;
    use crate::domain::ports::HostInitiators;

    #[test]
    fn test_unwind_order_respects_dependencies() {
        let mut ledger = RollbackLedger::new();
        ledger.record(UndoAction::DeleteHost { name: "h1".into() });
        ledger.record(UndoAction::DeleteHost { name: "h2".into() });
        ledger.record(UndoAction::DeleteHostGroup { name: "g".into() });
        ledger.record(UndoAction::DeleteVolume { name: "v".into() });
        ledger.record(UndoAction::DisconnectVolume {
            volume: "v".into(),
            group: "g".into(),
        });

        let order = ledger.unwind_order();
        assert_eq!(
            order,
            vec![
                UndoAction::DisconnectVolume {
                    volume: "v".into(),
                    group: "g".into()
                },
                UndoAction::DeleteVolume { name: "v".into() },
                UndoAction::DeleteHost { name: "h2".into() },
                UndoAction::DeleteHost { name: "h1".into() },
                UndoAction::DeleteHostGroup { name: "g".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_unwind_removes_everything() {
        let array = SimulatedArray::new("2dcf29ad-6aca", "array-0");
        let guard = CallGuard::default();
        let mut ledger = RollbackLedger::new();

        array
            .create_host("esxi-01", &HostInitiators::FibreChannel(vec!["2100000000000001".into()]))
            .await
            .unwrap();
        ledger.record(UndoAction::DeleteHost { name: "esxi-01".into() });
        array
            .create_host_group("WorkloadDomain-1234", &["esxi-01".to_string()])
            .await
            .unwrap();
        ledger.record(UndoAction::DeleteHostGroup {
            name: "WorkloadDomain-1234".into(),
        });
        array.create_volume("ds-gold", 1 << 30).await.unwrap();
        ledger.record(UndoAction::DeleteVolume { name: "ds-gold".into() });
        array
            .connect_volume_to_group("ds-gold", "WorkloadDomain-1234")
            .await
            .unwrap();
        ledger.record(UndoAction::DisconnectVolume {
            volume: "ds-gold".into(),
            group: "WorkloadDomain-1234".into(),
        });

        let report = ledger.unwind(&*array, &guard).await;
        assert!(report.is_clean(), "{:?}", report.failed);
        assert_eq!(report.undone.len(), 4);
        assert!(array.volumes().is_empty());
        assert!(array.destroyed_volumes().is_empty());
        assert!(array.hosts().is_empty());
        assert!(array.host_groups().is_empty());
        assert!(array.volume_connections().is_empty());
    }

    #[tokio::test]
    async fn test_failed_undo_does_not_stop_unwind() {
        let array = SimulatedArray::new("2dcf29ad-6aca", "array-0");
        array.create_volume("ds-gold", 1 << 30).await.unwrap();

        let mut ledger = RollbackLedger::new();
        ledger.record(UndoAction::DeleteHost { name: "never-created".into() });
        ledger.record(UndoAction::DeleteVolume { name: "ds-gold".into() });

        let report = ledger.unwind(&*array, &CallGuard::default()).await;
        assert_eq!(report.undone, vec![UndoAction::DeleteVolume { name: "ds-gold".into() }]);
        assert_eq!(report.failed.len(), 1);
        assert!(array.volumes().is_empty());
    }
}
