mod client;
mod manifest;
mod oauth;
pub mod urn;

pub use client::{
    ApiErrorClass, ApsClient, ApsError, EntryKind, FolderEntry, FolderSummary, HubSummary,
    ItemVersion, JobResponse, ProjectSummary, TranslationJob,
};
pub use manifest::{DerivativeNode, Manifest};
pub use oauth::{Grant, OAuthClient, OAuthError, OAuthToken};
