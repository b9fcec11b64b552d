//! Trend ingest: the optional second idea source.

use crate::config::TrendSettings;
use crate::dashboard::{DashboardClient, NewRow, RowStatus};
use crate::providers::TrendSource;
use crate::resilience::{CallError, ErrorKind};
use crate::state::{Item, ItemSource, StateDb};
use crate::store::ItemLocks;
use std::sync::Arc;
use tracing::{info, warn};

/// Pulls trending titles from the categorized source and appends them as
/// `Pending Approval` rows.
///
/// The source is known to be flaky (routine 403s); auth and client
/// failures degrade to "no trends this tick" instead of failing the run.
pub struct TrendIngestAdapter {
    source: Arc<dyn TrendSource>,
    dashboard: Arc<dyn DashboardClient>,
    settings: TrendSettings,
}

impl TrendIngestAdapter {
    pub fn new(
        source: Arc<dyn TrendSource>,
        dashboard: Arc<dyn DashboardClient>,
        settings: TrendSettings,
    ) -> Self {
        Self {
            source,
            dashboard,
            settings,
        }
    }

    /// Ingests one batch of trends; returns how many items were created.
    pub async fn run(&self, db: &StateDb, locks: &ItemLocks) -> Result<usize, CallError> {
        let posts = match self
            .source
            .fetch(self.settings.min_score, self.settings.per_tick_limit)
            .await
        {
            Ok(posts) => posts,
            Err(e) if matches!(e.kind(), ErrorKind::Auth | ErrorKind::Client) => {
                warn!(kind = e.kind().as_str(), "trend source unavailable, continuing without it");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut created = 0;
        for post in posts {
            // Skip titles already on the dashboard from an earlier tick
            let duplicate = db
                .list()
                .iter()
                .any(|item| item.concept_text == post.title);
            if duplicate {
                continue;
            }
            let appended = self
                .dashboard
                .append_item(NewRow {
                    source: ItemSource::SocialTrend.as_str().to_string(),
                    title: post.title.clone(),
                    status: RowStatus::PendingApproval,
                })
                .await;
            let item_id = match appended {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to append trend row, skipping");
                    continue;
                }
            };
            let guard = locks.acquire(&item_id).await;
            let item = Item::new(item_id, ItemSource::SocialTrend, post.title);
            if let Err(e) = db.commit(&guard, &item) {
                warn!(error = %e, "failed to record trend locally");
                continue;
            }
            created += 1;
        }
        info!(created, "trend ingest pass complete");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::InMemoryDashboard;
    use crate::providers::TrendPost;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn settings() -> TrendSettings {
        TrendSettings {
            client_id: "id".into(),
            client_secret: "secret".into(),
            category: "interesting".into(),
            min_score: 500,
            per_tick_limit: 5,
        }
    }

    struct FixedTrends(Vec<TrendPost>);

    #[async_trait]
    impl TrendSource for FixedTrends {
        async fn fetch(&self, _min: i64, _limit: usize) -> Result<Vec<TrendPost>, CallError> {
            Ok(self.0.clone())
        }
    }

    struct Forbidden;

    #[async_trait]
    impl TrendSource for Forbidden {
        async fn fetch(&self, _min: i64, _limit: usize) -> Result<Vec<TrendPost>, CallError> {
            Err(CallError::Auth {
                message: "HTTP 403".into(),
            })
        }
    }

    #[tokio::test]
    async fn ingests_trends_as_pending_items() {
        let dir = TempDir::new().unwrap();
        let db = StateDb::open(dir.path().join("items.db")).unwrap();
        let locks = ItemLocks::new();
        let dashboard = Arc::new(InMemoryDashboard::new());

        let adapter = TrendIngestAdapter::new(
            Arc::new(FixedTrends(vec![TrendPost {
                title: "TIL octopuses have three hearts".into(),
                score: 12_000,
            }])),
            Arc::clone(&dashboard) as Arc<dyn DashboardClient>,
            settings(),
        );
        let created = adapter.run(&db, &locks).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(db.list()[0].source, ItemSource::SocialTrend);
    }

    #[tokio::test]
    async fn forbidden_source_degrades_gracefully() {
        let dir = TempDir::new().unwrap();
        let db = StateDb::open(dir.path().join("items.db")).unwrap();
        let locks = ItemLocks::new();

        let adapter = TrendIngestAdapter::new(
            Arc::new(Forbidden),
            Arc::new(InMemoryDashboard::new()) as Arc<dyn DashboardClient>,
            settings(),
        );
        let created = adapter.run(&db, &locks).await.unwrap();
        assert_eq!(created, 0);
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn duplicate_titles_are_skipped() {
        let dir = TempDir::new().unwrap();
        let db = StateDb::open(dir.path().join("items.db")).unwrap();
        let locks = ItemLocks::new();
        let dashboard = Arc::new(InMemoryDashboard::new());

        let adapter = TrendIngestAdapter::new(
            Arc::new(FixedTrends(vec![TrendPost {
                title: "Same trend".into(),
                score: 9_000,
            }])),
            Arc::clone(&dashboard) as Arc<dyn DashboardClient>,
            settings(),
        );
        assert_eq!(adapter.run(&db, &locks).await.unwrap(), 1);
        assert_eq!(adapter.run(&db, &locks).await.unwrap(), 0);
        assert_eq!(db.len(), 1);
    }
}
