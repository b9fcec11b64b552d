//! Approval watcher: the one stage driven by an operator edit.

use super::{StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::dashboard::{DashboardClient, DashboardError, RowStatus};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::ItemLockGuard;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Watches the dashboard for the operator flipping a row to `Approved`.
///
/// Produces nothing; completing this stage moves the item into production.
pub struct ApprovalAdapter {
    dashboard: Arc<dyn DashboardClient>,
}

impl ApprovalAdapter {
    pub fn new(dashboard: Arc<dyn DashboardClient>) -> Self {
        Self { dashboard }
    }
}

#[async_trait]
impl StageAdapter for ApprovalAdapter {
    fn stage(&self) -> Stage {
        Stage::Approval
    }

    async fn execute(
        &self,
        _ctx: &StageContext,
        _guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let row = match self.dashboard.get_item(&item.item_id).await {
            Ok(row) => row,
            Err(DashboardError::NotFound(_)) => {
                debug!(item_id = %item.item_id, "row vanished while pending approval");
                return Ok(StageOutcome::NotReady);
            }
            Err(DashboardError::Call(e)) => return Err(e),
            Err(e) => {
                return Err(CallError::Unexpected {
                    message: format!("dashboard read failed: {}", e),
                })
            }
        };

        match row.status {
            RowStatus::Approved => Ok(StageOutcome::Completed(StageOutput::default())),
            _ => Ok(StageOutcome::NotReady),
        }
    }
}
