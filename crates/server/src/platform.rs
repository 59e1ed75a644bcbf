//! The sync layer bound to the catalog and its dependency graph.

use std::sync::Arc;

use versync_core::{
    ApiResponse, AppConfig, CascadeReport, Committed, DependencyGraph, Error, InvalidationPlan, Resource,
    ResourceReader, StoreHandle, SyncEndpoint, SyncOutcome, SyncService,
};

use crate::catalog::{Catalog, RecordWrite};

#[derive(Clone)]
pub struct Platform {
    endpoint: SyncEndpoint<Catalog>,
    graph: Arc<DependencyGraph>,
}

impl Platform {
    pub fn new(service: SyncService, catalog: Catalog) -> Self {
        Self { endpoint: SyncEndpoint::new(service, Arc::new(catalog)), graph: Arc::new(DependencyGraph::platform()) }
    }

    /// Connect the configured store and open the catalog.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let service = SyncService::connect(config).await?;
        let catalog = Catalog::open(&config.catalog_path, config.search_page_size).await?;
        tracing::info!(
            catalog = %config.catalog_path.display(),
            page_size = catalog.page_size(),
            "catalog opened"
        );
        Ok(Self::new(service, catalog))
    }

    /// Everything in memory, for tests.
    pub async fn in_memory(page_size: u32) -> Result<Self, Error> {
        let catalog = Catalog::open_in_memory(page_size).await?;
        Ok(Self::new(SyncService::new(StoreHandle::in_memory()), catalog))
    }

    pub fn service(&self) -> &SyncService {
        self.endpoint.service()
    }

    pub fn catalog(&self) -> &Catalog {
        self.endpoint.source()
    }

    pub async fn read(&self, resource: &Resource, client_version: Option<&str>) -> Result<SyncOutcome, Error> {
        self.endpoint.read(resource, client_version).await
    }

    pub async fn read_batch(&self, requests: &[(Resource, Option<String>)]) -> Vec<Result<SyncOutcome, Error>> {
        self.endpoint.read_batch(requests).await
    }

    /// Commit a record write to the catalog, then invalidate everything
    /// derived from it.
    pub async fn write(&self, write: RecordWrite) -> (ApiResponse, Option<CascadeReport>) {
        let catalog = self.catalog();
        let graph = &self.graph;
        let verb = if write.delete { "deleted" } else { "saved" };
        let label = format!("{} {}", write.entity, write.id);

        self.service()
            .write(async move {
                let changes = catalog.commit(write).await?;
                let mut plan = InvalidationPlan::new();
                for change in &changes {
                    plan.merge(graph.plan(change));
                }
                Ok(Committed { message: format!("{label} {verb}"), plan })
            })
            .await
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.service().close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use versync_core::EntityKind;

    #[tokio::test]
    async fn test_write_then_read_sees_new_version() {
        let platform = Platform::in_memory(9).await.unwrap();
        platform
            .write(RecordWrite::upsert(EntityKind::Course, "c1").titled("Intro"))
            .await;

        let first = platform.read(&Resource::CoursesList, None).await.unwrap();
        let version = first.version().to_string();
        assert_eq!(first.data(), Some(&json!([{"id": "c1", "title": "Intro"}])));

        let (response, report) = platform
            .write(RecordWrite::upsert(EntityKind::Course, "c2").titled("Advanced"))
            .await;
        assert!(response.is_success());
        assert_eq!(response.message, "course c2 saved");
        assert!(report.unwrap().is_complete());

        let second = platform.read(&Resource::CoursesList, Some(&version)).await.unwrap();
        assert!(!second.is_not_modified());
        assert_eq!(second.data().unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            store_path: dir.path().join("store.sqlite"),
            catalog_path: dir.path().join("catalog.sqlite"),
            ..Default::default()
        };

        let platform = Platform::open(&config).await.unwrap();
        platform
            .write(RecordWrite::upsert(EntityKind::User, "u1").titled("Ada"))
            .await;

        let users = platform.read(&Resource::AdminUsers, None).await.unwrap();
        assert_eq!(users.data().unwrap()[0]["id"], "u1");
        platform.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_versions_alone() {
        let platform = Platform::in_memory(9).await.unwrap();
        let before = platform.read(&Resource::AdminEnrollments, None).await.unwrap();

        let (response, report) = platform
            .write(RecordWrite::upsert(EntityKind::Enrollment, "e1"))
            .await;
        assert!(!response.is_success());
        assert!(report.is_none());

        let after = platform
            .read(&Resource::AdminEnrollments, Some(before.version()))
            .await
            .unwrap();
        assert!(after.is_not_modified());
    }

    #[tokio::test]
    async fn test_enrollment_refreshes_user_view() {
        let platform = Platform::in_memory(9).await.unwrap();
        let user_view = Resource::UserEnrollments { user_id: "u1".into() };
        let before = platform.read(&user_view, None).await.unwrap();
        assert_eq!(before.data(), Some(&json!([])));

        platform
            .write(RecordWrite::upsert(EntityKind::Enrollment, "e1").owned_by("u1").under("c1"))
            .await;

        let after = platform.read(&user_view, Some(before.version())).await.unwrap();
        assert_eq!(after.data().unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_moved_enrollment_refreshes_previous_owner() {
        let platform = Platform::in_memory(9).await.unwrap();
        platform
            .write(RecordWrite::upsert(EntityKind::Enrollment, "e1").owned_by("u1").under("c1"))
            .await;
        let old_owner = Resource::UserEnrollments { user_id: "u1".into() };
        let before = platform.read(&old_owner, None).await.unwrap();

        platform
            .write(RecordWrite::upsert(EntityKind::Enrollment, "e1").owned_by("u2"))
            .await;

        let after = platform.read(&old_owner, Some(before.version())).await.unwrap();
        assert_eq!(after.data(), Some(&json!([])));
    }
}
