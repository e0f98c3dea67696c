use std::collections::HashSet;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::manifest::Manifest;
use crate::urn::strip_urn_prefix;

const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

#[derive(Debug, Error)]
pub enum ApsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("aps returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Bearer-authenticated client for the hub, folder and derivative endpoints.
///
/// The token is passed per call so callers can ask their token provider for a
/// fresh one at every call site.
#[derive(Clone)]
pub struct ApsClient {
    http: Client,
    base_url: Url,
}

impl ApsClient {
    pub fn new() -> Result<Self, ApsError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ApsError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApsError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_hubs(&self, token: &str) -> Result<Vec<HubSummary>, ApsError> {
        let url = self.endpoint(&["project", "v1", "hubs"])?;
        let doc: Document<RawResource> = self.get_json(token, url).await?;
        Ok(doc
            .into_data()
            .into_iter()
            .map(|hub| HubSummary {
                name: hub.attributes.name.unwrap_or_else(|| "Unknown Hub".into()),
                id: hub.id,
            })
            .collect())
    }

    pub async fn list_projects(
        &self,
        token: &str,
        hub_id: &str,
    ) -> Result<Vec<ProjectSummary>, ApsError> {
        let url = self.endpoint(&["project", "v1", "hubs", hub_id, "projects"])?;
        let doc: Document<RawResource> = self.get_json(token, url).await?;
        Ok(doc
            .into_data()
            .into_iter()
            .map(|project| ProjectSummary {
                name: project
                    .attributes
                    .name
                    .unwrap_or_else(|| "Unknown Project".into()),
                id: project.id,
            })
            .collect())
    }

    pub async fn list_top_folders(
        &self,
        token: &str,
        hub_id: &str,
        project_id: &str,
    ) -> Result<Vec<FolderSummary>, ApsError> {
        let url = self.endpoint(&[
            "project",
            "v1",
            "hubs",
            hub_id,
            "projects",
            project_id,
            "topFolders",
        ])?;
        let doc: Document<RawResource> = self.get_json(token, url).await?;
        Ok(doc
            .into_data()
            .into_iter()
            .map(|folder| FolderSummary {
                name: folder.attributes.name.unwrap_or_else(|| "Top".into()),
                id: folder.id,
            })
            .collect())
    }

    /// Lists the direct children of a folder, following `links.next` pages.
    pub async fn list_folder_contents(
        &self,
        token: &str,
        project_id: &str,
        folder_id: &str,
    ) -> Result<Vec<FolderEntry>, ApsError> {
        let first = self.endpoint(&[
            "data", "v1", "projects", project_id, "folders", folder_id, "contents",
        ])?;
        let mut next = Some(first);
        let mut fetched = HashSet::new();
        let mut entries = Vec::new();
        while let Some(url) = next.take() {
            let doc: Document<RawResource> = self.get_json(token, url.clone()).await?;
            fetched.insert(url);
            let following = doc.next_page()?;
            entries.extend(
                doc.into_data()
                    .into_iter()
                    .map(|raw| FolderEntry::from_raw(raw, folder_id)),
            );
            next = match following {
                Some(candidate) if fetched.contains(&candidate) => {
                    tracing::warn!(
                        folder = folder_id,
                        next = %candidate,
                        "pagination link points at a page already fetched, stopping"
                    );
                    None
                }
                other => other,
            };
        }
        Ok(entries)
    }

    pub async fn list_item_versions(
        &self,
        token: &str,
        project_id: &str,
        item_id: &str,
    ) -> Result<Vec<ItemVersion>, ApsError> {
        let url = self.endpoint(&[
            "data", "v1", "projects", project_id, "items", item_id, "versions",
        ])?;
        let doc: Document<RawResource> = self.get_json(token, url).await?;
        Ok(doc.into_data().into_iter().map(ItemVersion::from_raw).collect())
    }

    /// Fetches the derivative manifest. `None` means nothing was derived yet.
    pub async fn get_manifest(&self, token: &str, urn: &str) -> Result<Option<Manifest>, ApsError> {
        let url = self.endpoint(&[
            "modelderivative",
            "v2",
            "designdata",
            strip_urn_prefix(urn),
            "manifest",
        ])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", Self::auth_header_value(token))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::handle_response(response).await?))
    }

    pub async fn submit_translation_job(
        &self,
        token: &str,
        job: &TranslationJob,
    ) -> Result<JobResponse, ApsError> {
        let url = self.endpoint(&["modelderivative", "v2", "designdata", "job"])?;
        let response = self
            .http
            .post(url)
            .header("Authorization", Self::auth_header_value(token))
            .json(&job.payload())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ApsError::Api { status, body });
        }
        let parsed = serde_json::from_str::<JobResponse>(&body).unwrap_or_default();
        Ok(JobResponse {
            status: Some(status.as_u16()),
            ..parsed
        })
    }

    fn auth_header_value(token: &str) -> String {
        format!("Bearer {token}")
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApsError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: Url,
    ) -> Result<T, ApsError> {
        tracing::debug!(path = url.path(), "aps request");
        let response = self
            .http
            .get(url)
            .header("Authorization", Self::auth_header_value(token))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApsError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApsError::Api { status, body })
        }
    }
}

impl ApsError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApsError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        self.status().map(classify_api_status)
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    Item,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Folder => "folder",
            EntryKind::Item => "item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    /// The folder this entry was listed from.
    pub parent_id: String,
}

impl FolderEntry {
    fn from_raw(raw: RawResource, folder_id: &str) -> Self {
        if raw.resource_type == "folders" {
            Self {
                id: raw.id,
                name: raw.attributes.name.unwrap_or_else(|| "Folder".into()),
                kind: EntryKind::Folder,
                parent_id: folder_id.to_string(),
            }
        } else {
            Self {
                id: raw.id,
                name: raw
                    .attributes
                    .display_name
                    .unwrap_or_else(|| "Item".into()),
                kind: EntryKind::Item,
                parent_id: folder_id.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemVersion {
    pub id: String,
    pub data_type: Option<String>,
    pub derivative_urn: Option<String>,
    pub storage_id: Option<String>,
}

impl ItemVersion {
    fn from_raw(raw: RawResource) -> Self {
        let relationships = raw.relationships;
        Self {
            id: raw.id,
            data_type: raw.attributes.extension.and_then(|ext| ext.extension_type),
            derivative_urn: relationships.derivatives.and_then(RawRelationship::into_id),
            storage_id: relationships.storage.and_then(RawRelationship::into_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationJob {
    pub urn: String,
    pub region: Option<String>,
    pub format: String,
    pub views: Vec<String>,
}

impl TranslationJob {
    fn payload(&self) -> serde_json::Value {
        let mut output = json!({
            "formats": [{ "type": self.format, "views": self.views }],
        });
        if let Some(region) = &self.region {
            output["destination"] = json!({ "region": region });
        }
        json!({
            "input": { "urn": strip_urn_prefix(&self.urn) },
            "output": output,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobResponse {
    #[serde(skip)]
    pub status: Option<u16>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub urn: Option<String>,
}

/// JSON:API envelope. Missing and `null` members both decode to `None`.
#[derive(Debug, Deserialize)]
struct Document<T> {
    data: Option<Vec<T>>,
    links: Option<Links>,
}

impl<T> Document<T> {
    fn next_page(&self) -> Result<Option<Url>, ApsError> {
        match self.links.as_ref().and_then(|links| links.next.as_ref()) {
            Some(link) => Ok(Some(Url::parse(&link.href)?)),
            None => Ok(None),
        }
    }

    fn into_data(self) -> Vec<T> {
        self.data.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "type", default)]
    resource_type: String,
    id: String,
    #[serde(default)]
    attributes: RawAttributes,
    #[serde(default)]
    relationships: RawRelationships,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    extension: Option<RawExtension>,
}

#[derive(Debug, Deserialize)]
struct RawExtension {
    #[serde(rename = "type", default)]
    extension_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelationships {
    #[serde(default)]
    derivatives: Option<RawRelationship>,
    #[serde(default)]
    storage: Option<RawRelationship>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(default)]
    data: Option<RawRelationshipData>,
}

impl RawRelationship {
    fn into_id(self) -> Option<String> {
        self.data.map(|data| data.id)
    }
}

#[derive(Debug, Deserialize)]
struct RawRelationshipData {
    id: String,
}
