use aps_core::urn::{encode_urn, strip_urn_prefix};
use aps_core::{ApsClient, ApsError, Manifest, TranslationJob};
use serde::Serialize;
use thiserror::Error;

use crate::storage::ViewerFields;

const UNKNOWN_DATA_TYPE: &str = "versions:unknown";

#[derive(Debug, Error)]
pub enum ViewableError {
    #[error("api error: {0}")]
    Api(#[from] ApsError),
    #[error("item {0} has no versions")]
    NoVersions(String),
    #[error("version {0} has no storage id")]
    NoStorage(String),
    #[error("translation job rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("translation job failed for all formats, last {status}: {body}")]
    AllFormatsFailed { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svf2,
    Otg,
    Svf,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Svf2 => "svf2",
            OutputFormat::Otg => "otg",
            OutputFormat::Svf => "svf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum View {
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "2d")]
    TwoD,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::ThreeD => "3d",
            View::TwoD => "2d",
        }
    }
}

/// Translation candidates, most preferred first.
pub const FALLBACK_ORDER: [(OutputFormat, View); 6] = [
    (OutputFormat::Svf2, View::ThreeD),
    (OutputFormat::Svf2, View::TwoD),
    (OutputFormat::Otg, View::ThreeD),
    (OutputFormat::Otg, View::TwoD),
    (OutputFormat::Svf, View::ThreeD),
    (OutputFormat::Svf, View::TwoD),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum EnsureOutcome {
    AlreadyReady,
    Submitted { format: OutputFormat, view: View },
}

/// Resolves the latest version of an item to the URN the viewer loads and
/// whether its derivative manifest finished.
pub async fn viewer_info(
    client: &ApsClient,
    token: &str,
    project_id: &str,
    item_id: &str,
) -> Result<ViewerFields, ViewableError> {
    let versions = client.list_item_versions(token, project_id, item_id).await?;
    let latest = versions
        .into_iter()
        .last()
        .ok_or_else(|| ViewableError::NoVersions(item_id.to_string()))?;

    let urn = match latest.derivative_urn {
        Some(urn) => urn,
        None => {
            let storage_id = latest
                .storage_id
                .as_deref()
                .ok_or_else(|| ViewableError::NoStorage(latest.id.clone()))?;
            encode_urn(storage_id)
        }
    };
    let translated = manifest_check(client, token, &urn, Manifest::is_success).await?;

    Ok(ViewerFields {
        version_id: latest.id,
        data_type: latest
            .data_type
            .unwrap_or_else(|| UNKNOWN_DATA_TYPE.to_string()),
        urn,
        translated,
    })
}

pub async fn is_viewable_ready(
    client: &ApsClient,
    token: &str,
    urn: &str,
) -> Result<bool, ViewableError> {
    manifest_check(client, token, urn, Manifest::has_viewable_derivative).await
}

/// Submits a translation job unless a viewable derivative already exists.
///
/// Candidates are tried in [`FALLBACK_ORDER`]. 403 and 404 end the attempt
/// right away since no other format can fix permissions or a bad URN.
pub async fn ensure_viewable_with_fallback(
    client: &ApsClient,
    token: &str,
    urn: &str,
    region: Option<&str>,
) -> Result<EnsureOutcome, ViewableError> {
    let urn = strip_urn_prefix(urn);
    if is_viewable_ready(client, token, urn).await? {
        return Ok(EnsureOutcome::AlreadyReady);
    }

    let mut last_failure = None;
    for (format, view) in FALLBACK_ORDER {
        let job = TranslationJob {
            urn: urn.to_string(),
            region: region.map(str::to_string),
            format: format.as_str().to_string(),
            views: vec![view.as_str().to_string()],
        };
        match client.submit_translation_job(token, &job).await {
            Ok(_) => {
                tracing::info!(
                    format = format.as_str(),
                    view = view.as_str(),
                    "translation job submitted"
                );
                return Ok(EnsureOutcome::Submitted { format, view });
            }
            Err(ApsError::Api { status, body }) => {
                let status = status.as_u16();
                if status == 403 || status == 404 {
                    return Err(ViewableError::Rejected { status, body });
                }
                tracing::debug!(
                    format = format.as_str(),
                    view = view.as_str(),
                    status,
                    "translation candidate refused"
                );
                last_failure = Some((status, body));
            }
            Err(err) => return Err(err.into()),
        }
    }

    let (status, body) = last_failure.unwrap_or_default();
    Err(ViewableError::AllFormatsFailed { status, body })
}

/// Reads the manifest and applies `check`. Missing manifests and API errors
/// count as "not ready"; transport failures propagate.
async fn manifest_check(
    client: &ApsClient,
    token: &str,
    urn: &str,
    check: fn(&Manifest) -> bool,
) -> Result<bool, ViewableError> {
    match client.get_manifest(token, urn).await {
        Ok(Some(manifest)) => Ok(check(&manifest)),
        Ok(None) => Ok(false),
        Err(ApsError::Api { status, .. }) => {
            tracing::debug!(status = status.as_u16(), "manifest unavailable");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[path = "viewable_tests.rs"]
mod tests;
