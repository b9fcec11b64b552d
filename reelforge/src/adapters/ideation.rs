//! Idea generation: creates new items rather than advancing one.

use crate::dashboard::{DashboardClient, NewRow, RowStatus};
use crate::providers::TextGenerator;
use crate::resilience::CallError;
use crate::state::{Item, ItemSource, StateDb};
use crate::store::ItemLocks;
use std::sync::Arc;
use tracing::{info, warn};

/// Generates fresh concept titles and appends them to the dashboard as
/// `Pending Approval` rows, mirrored into the local store.
///
/// Runs from the supervisor's daily pass, not the per-item worker path.
pub struct IdeationAdapter {
    textgen: Arc<dyn TextGenerator>,
    dashboard: Arc<dyn DashboardClient>,
}

impl IdeationAdapter {
    pub fn new(textgen: Arc<dyn TextGenerator>, dashboard: Arc<dyn DashboardClient>) -> Self {
        Self { textgen, dashboard }
    }

    /// Generates `count` ideas; returns how many items were created.
    pub async fn run(
        &self,
        db: &StateDb,
        locks: &ItemLocks,
        count: usize,
    ) -> Result<usize, CallError> {
        let ideas = self.textgen.generate_ideas(count).await?;
        let mut created = 0;
        for title in ideas {
            let appended = self
                .dashboard
                .append_item(NewRow {
                    source: ItemSource::AiIdeation.as_str().to_string(),
                    title: title.clone(),
                    status: RowStatus::PendingApproval,
                })
                .await;
            let item_id = match appended {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to append idea row, skipping");
                    continue;
                }
            };
            let guard = locks.acquire(&item_id).await;
            let item = Item::new(item_id, ItemSource::AiIdeation, title);
            if let Err(e) = db.commit(&guard, &item) {
                warn!(error = %e, "failed to record idea locally");
                continue;
            }
            created += 1;
        }
        info!(created, "ideation pass complete");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::InMemoryDashboard;
    use crate::providers::MetadataDraft;
    use crate::state::ItemState;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedIdeas(Vec<String>);

    #[async_trait]
    impl TextGenerator for FixedIdeas {
        async fn generate_ideas(&self, count: usize) -> Result<Vec<String>, CallError> {
            Ok(self.0.iter().take(count).cloned().collect())
        }
        async fn generate_script(&self, _t: &str, _k: &str) -> Result<String, CallError> {
            unimplemented!()
        }
        async fn generate_metadata(
            &self,
            _t: &str,
            _s: &str,
            _k: &str,
        ) -> Result<MetadataDraft, CallError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn appends_rows_and_local_items() {
        let dir = TempDir::new().unwrap();
        let db = StateDb::open(dir.path().join("items.db")).unwrap();
        let locks = ItemLocks::new();
        let dashboard = Arc::new(InMemoryDashboard::new());

        let adapter = IdeationAdapter::new(
            Arc::new(FixedIdeas(vec![
                "Three Morning Habits".into(),
                "Desk Stretches That Work".into(),
            ])),
            Arc::clone(&dashboard) as Arc<dyn DashboardClient>,
        );
        let created = adapter.run(&db, &locks, 3).await.unwrap();

        assert_eq!(created, 2);
        assert_eq!(dashboard.len(), 2);
        assert_eq!(db.len(), 2);
        for item in db.list() {
            assert_eq!(item.state, ItemState::PendingApproval);
            assert_eq!(item.source, ItemSource::AiIdeation);
        }
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        struct Failing;
        #[async_trait]
        impl TextGenerator for Failing {
            async fn generate_ideas(&self, _count: usize) -> Result<Vec<String>, CallError> {
                Err(CallError::Transient {
                    message: "503".into(),
                })
            }
            async fn generate_script(&self, _t: &str, _k: &str) -> Result<String, CallError> {
                unimplemented!()
            }
            async fn generate_metadata(
                &self,
                _t: &str,
                _s: &str,
                _k: &str,
            ) -> Result<MetadataDraft, CallError> {
                unimplemented!()
            }
        }

        let dir = TempDir::new().unwrap();
        let db = StateDb::open(dir.path().join("items.db")).unwrap();
        let locks = ItemLocks::new();
        let adapter = IdeationAdapter::new(
            Arc::new(Failing),
            Arc::new(InMemoryDashboard::new()) as Arc<dyn DashboardClient>,
        );
        assert!(adapter.run(&db, &locks, 3).await.is_err());
    }
}
