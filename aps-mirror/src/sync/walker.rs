use std::collections::{HashSet, VecDeque};

use aps_core::{ApsClient, ApsError, EntryKind, FolderEntry};
use thiserror::Error;

use super::report::SyncFailure;
use super::viewable::viewer_info;
use crate::storage::{ContentInput, ContentKind};
use crate::token_provider::{TokenError, TokenProvider};

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("api error: {0}")]
    Api(#[from] ApsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// The listed folders and their direct children.
    FirstLevel,
    /// Every folder below the listed ones.
    AllLevels,
}

#[derive(Debug, Default)]
pub struct Walk {
    pub nodes: Vec<ContentInput>,
    pub failures: Vec<SyncFailure>,
}

impl Walk {
    fn record_failure(&mut self, scope: String, error: impl std::fmt::Display) {
        let failure = SyncFailure::new(scope, error);
        tracing::warn!(scope = %failure.scope, error = %failure.error, "walk step failed");
        self.failures.push(failure);
    }
}

/// Flattens a remote folder hierarchy into content nodes.
///
/// Folders are visited breadth first from a work queue, one request at a
/// time. Node ids already emitted are skipped, which also stops cycles.
pub struct HierarchyWalker<'a> {
    client: &'a ApsClient,
    tokens: &'a TokenProvider,
}

impl<'a> HierarchyWalker<'a> {
    pub fn new(client: &'a ApsClient, tokens: &'a TokenProvider) -> Self {
        Self { client, tokens }
    }

    /// Emits the project's top folders (parented to the project id) followed
    /// by everything below them down to `depth`.
    pub async fn walk_project(
        &self,
        hub_id: &str,
        project_id: &str,
        depth: Depth,
    ) -> Result<Walk, WalkError> {
        let token = self.tokens.valid_access_token().await?;
        let tops = self
            .client
            .list_top_folders(&token, hub_id, project_id)
            .await?;

        let mut walk = Walk::default();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for top in tops {
            if !seen.insert(top.id.clone()) {
                tracing::warn!(id = %top.id, "duplicate top folder skipped");
                continue;
            }
            queue.push_back(top.id.clone());
            walk.nodes.push(ContentInput {
                id: top.id,
                project_id: project_id.to_string(),
                parent_id: project_id.to_string(),
                name: top.name,
                kind: ContentKind::Folder,
                viewer: None,
            });
        }

        self.drain(project_id, queue, depth, &mut seen, &mut walk)
            .await?;
        Ok(walk)
    }

    /// Emits the children of one folder, and their descendants for
    /// [`Depth::AllLevels`]. The folder itself is not emitted.
    pub async fn walk_folder(
        &self,
        project_id: &str,
        folder_id: &str,
        depth: Depth,
    ) -> Result<Walk, WalkError> {
        let token = self.tokens.valid_access_token().await?;
        let entries = self
            .client
            .list_folder_contents(&token, project_id, folder_id)
            .await?;

        let mut walk = Walk::default();
        let mut seen = HashSet::from([folder_id.to_string()]);
        let mut queue = VecDeque::new();
        self.expand(project_id, entries, depth, &mut seen, &mut queue, &mut walk)
            .await?;
        self.drain(project_id, queue, depth, &mut seen, &mut walk)
            .await?;
        Ok(walk)
    }

    async fn drain(
        &self,
        project_id: &str,
        mut queue: VecDeque<String>,
        depth: Depth,
        seen: &mut HashSet<String>,
        walk: &mut Walk,
    ) -> Result<(), WalkError> {
        while let Some(folder_id) = queue.pop_front() {
            let token = self.tokens.valid_access_token().await?;
            let entries = match self
                .client
                .list_folder_contents(&token, project_id, &folder_id)
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    walk.record_failure(format!("folder {folder_id}"), err);
                    continue;
                }
            };
            self.expand(project_id, entries, depth, seen, &mut queue, walk)
                .await?;
        }
        Ok(())
    }

    async fn expand(
        &self,
        project_id: &str,
        entries: Vec<FolderEntry>,
        depth: Depth,
        seen: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
        walk: &mut Walk,
    ) -> Result<(), WalkError> {
        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                tracing::warn!(
                    id = %entry.id,
                    parent = %entry.parent_id,
                    "node already visited, skipping"
                );
                continue;
            }
            let (kind, viewer) = match entry.kind {
                EntryKind::Folder => {
                    if depth == Depth::AllLevels {
                        queue.push_back(entry.id.clone());
                    }
                    (ContentKind::Folder, None)
                }
                EntryKind::Item => {
                    let token = self.tokens.valid_access_token().await?;
                    match viewer_info(self.client, &token, project_id, &entry.id).await {
                        Ok(viewer) => (ContentKind::Item, Some(viewer)),
                        Err(err) => {
                            walk.record_failure(format!("item {}", entry.id), err);
                            (ContentKind::Item, None)
                        }
                    }
                }
            };
            walk.nodes.push(ContentInput {
                id: entry.id,
                project_id: project_id.to_string(),
                parent_id: entry.parent_id,
                name: entry.name,
                kind,
                viewer,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "walker_tests.rs"]
mod tests;
