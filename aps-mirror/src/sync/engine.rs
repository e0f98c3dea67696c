use std::sync::Arc;

use aps_core::{ApsClient, ApsError};
use thiserror::Error;

use super::report::SyncReport;
use super::tree::orphans;
use super::viewable::{EnsureOutcome, ViewableError, ensure_viewable_with_fallback, viewer_info};
use super::walker::{Depth, HierarchyWalker, Walk, WalkError};
use crate::storage::{
    ContentKind, ContentRecord, MirrorStore, ProjectInput, StoreError, ViewerFields,
};
use crate::token_provider::{TokenError, TokenProvider};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("api error: {0}")]
    Api(#[from] ApsError),
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("viewable error: {0}")]
    Viewable(#[from] ViewableError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("content not found: {0}")]
    ContentNotFound(String),
    #[error("content {0} is not a folder")]
    NotAFolder(String),
    #[error("content {0} is not an item")]
    NotAnItem(String),
}

/// Operator procedures that pull remote state into the mirror store.
///
/// Every procedure asks the token provider for a token right before it talks
/// to APS. Remote calls run one at a time and no store transaction spans them.
pub struct MirrorSync {
    client: ApsClient,
    store: Arc<MirrorStore>,
    tokens: Arc<TokenProvider>,
    region: Option<String>,
}

impl MirrorSync {
    pub fn new(client: ApsClient, store: Arc<MirrorStore>, tokens: Arc<TokenProvider>) -> Self {
        Self {
            client,
            store,
            tokens,
            region: None,
        }
    }

    /// Destination region for translation jobs (`us` or `emea`).
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    pub async fn get_access_token(&self) -> Result<String, EngineError> {
        Ok(self.tokens.valid_access_token().await?)
    }

    /// Upserts every hub the token can see and the projects of each hub.
    ///
    /// A failed hub listing fails the call. A failed project listing for one
    /// hub is recorded and the remaining hubs are still synced.
    pub async fn sync_hubs_and_projects(&self) -> Result<SyncReport, EngineError> {
        let token = self.tokens.valid_access_token().await?;
        let hubs = self.client.list_hubs(&token).await?;

        let mut report = SyncReport::default();
        for hub in hubs {
            self.store.upsert_hub(&hub.id, &hub.name).await?;
            report.hubs += 1;

            let token = self.tokens.valid_access_token().await?;
            let projects = match self.client.list_projects(&token, &hub.id).await {
                Ok(projects) => projects,
                Err(err) => {
                    report.record_failure(format!("hub {}", hub.id), err);
                    continue;
                }
            };
            for project in projects {
                self.store
                    .upsert_project(&ProjectInput {
                        id: project.id,
                        name: project.name,
                        hub_id: hub.id.clone(),
                        hub_name: hub.name.clone(),
                    })
                    .await?;
                report.projects += 1;
            }
        }

        tracing::info!(
            hubs = report.hubs,
            projects = report.projects,
            failures = report.failures.len(),
            "hubs and projects synced"
        );
        Ok(report)
    }

    /// Mirrors a project's folder tree from its top folders down to `depth`.
    pub async fn sync_project_contents(
        &self,
        project_id: &str,
        depth: Depth,
    ) -> Result<SyncReport, EngineError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| EngineError::ProjectNotFound(project_id.to_string()))?;

        let walk = HierarchyWalker::new(&self.client, &self.tokens)
            .walk_project(&project.hub_id, &project.id, depth)
            .await?;
        let report = self.apply_walk(walk).await?;
        self.check_tree(&project.id).await?;

        tracing::info!(
            project = %project.id,
            ?depth,
            contents = report.contents,
            failures = report.failures.len(),
            "project contents synced"
        );
        Ok(report)
    }

    /// Refreshes the direct children of one mirrored folder.
    pub async fn sync_folder_children(&self, parent_id: &str) -> Result<SyncReport, EngineError> {
        let parent = self.content(parent_id).await?;
        if parent.kind != ContentKind::Folder {
            return Err(EngineError::NotAFolder(parent.id));
        }

        let walk = HierarchyWalker::new(&self.client, &self.tokens)
            .walk_folder(&parent.project_id, &parent.id, Depth::FirstLevel)
            .await?;
        let report = self.apply_walk(walk).await?;

        tracing::info!(
            folder = %parent.id,
            contents = report.contents,
            failures = report.failures.len(),
            "folder children synced"
        );
        Ok(report)
    }

    /// Re-reads the latest version and manifest state of one mirrored item.
    pub async fn sync_content_info(&self, content_id: &str) -> Result<ContentRecord, EngineError> {
        let content = self.item(content_id).await?;
        let (updated, _) = self.refresh_viewer(&content).await?;
        Ok(updated)
    }

    /// Makes sure the item has a viewable derivative, submitting a
    /// translation job when it does not. Items mirrored without a URN get
    /// their viewer info fetched first.
    pub async fn ensure_viewable(&self, content_id: &str) -> Result<EnsureOutcome, EngineError> {
        let content = self.item(content_id).await?;
        let urn = match content.urn.clone() {
            Some(urn) => urn,
            None => self.refresh_viewer(&content).await?.1.urn,
        };

        let token = self.tokens.valid_access_token().await?;
        let outcome =
            ensure_viewable_with_fallback(&self.client, &token, &urn, self.region.as_deref())
                .await?;
        tracing::info!(content = %content.id, ?outcome, "viewable ensured");
        Ok(outcome)
    }

    /// Removes every hub and project row. Returns `(hubs, projects)`.
    pub async fn delete_hubs_and_projects(&self) -> Result<(u64, u64), EngineError> {
        let deleted = self.store.delete_hubs_and_projects().await?;
        tracing::info!(hubs = deleted.0, projects = deleted.1, "hubs and projects deleted");
        Ok(deleted)
    }

    pub async fn delete_contents(&self) -> Result<u64, EngineError> {
        let deleted = self.store.delete_contents().await?;
        tracing::info!(contents = deleted, "contents deleted");
        Ok(deleted)
    }

    async fn content(&self, id: &str) -> Result<ContentRecord, EngineError> {
        self.store
            .get_content(id)
            .await?
            .ok_or_else(|| EngineError::ContentNotFound(id.to_string()))
    }

    async fn item(&self, id: &str) -> Result<ContentRecord, EngineError> {
        let content = self.content(id).await?;
        if content.kind != ContentKind::Item {
            return Err(EngineError::NotAnItem(content.id));
        }
        Ok(content)
    }

    async fn refresh_viewer(
        &self,
        content: &ContentRecord,
    ) -> Result<(ContentRecord, ViewerFields), EngineError> {
        let token = self.tokens.valid_access_token().await?;
        let viewer = viewer_info(&self.client, &token, &content.project_id, &content.id).await?;
        // The row can vanish under a concurrent delete between read and update.
        let updated = self
            .store
            .update_viewer_info(&content.id, &viewer)
            .await?
            .ok_or_else(|| EngineError::ContentNotFound(content.id.clone()))?;

        tracing::info!(
            content = %updated.id,
            translated = viewer.translated,
            "content info synced"
        );
        Ok((updated, viewer))
    }

    async fn apply_walk(&self, walk: Walk) -> Result<SyncReport, EngineError> {
        let mut report = SyncReport {
            failures: walk.failures,
            ..SyncReport::default()
        };
        for node in &walk.nodes {
            self.store.upsert_content(node).await?;
            report.contents += 1;
        }
        Ok(report)
    }

    async fn check_tree(&self, project_id: &str) -> Result<(), EngineError> {
        let contents = self.store.list_contents_by_project(project_id).await?;
        let stray = orphans(project_id, &contents);
        if !stray.is_empty() {
            tracing::warn!(
                project = %project_id,
                count = stray.len(),
                first = %stray[0].id,
                "mirrored contents reference missing parents"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
