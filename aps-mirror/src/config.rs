use std::time::Duration;

use anyhow::bail;

use crate::storage::{MirrorStore, StoreError};

const DEFAULT_API_BASE_URL: &str = "https://developer.api.autodesk.com";
const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;
const DEFAULT_OAUTH_SCOPE: &str = "data:read data:write";
const TRANSLATION_REGIONS: [&str; 2] = ["us", "emea"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorConfig {
    /// SQLite URL. `None` uses `<data_dir>/aps-mirror/mirror.db`.
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub refresh_margin: Duration,
    /// Space-separated APS scopes, sent at login and on refresh.
    pub oauth_scope: String,
    pub translation_region: Option<String>,
    pub log_json: bool,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let database_url = non_empty("APS_MIRROR_DATABASE_URL");
        let api_base_url = non_empty("APS_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let refresh_margin = Duration::from_secs(
            non_empty("APS_TOKEN_REFRESH_MARGIN_SECS")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_REFRESH_MARGIN_SECS),
        );
        let oauth_scope = non_empty("APS_OAUTH_SCOPE")
            .map(|value| value.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| DEFAULT_OAUTH_SCOPE.to_string());
        let translation_region = match non_empty("APS_TRANSLATION_REGION") {
            Some(region) => {
                let region = region.trim().to_ascii_lowercase();
                if !TRANSLATION_REGIONS.contains(&region.as_str()) {
                    bail!("APS_TRANSLATION_REGION must be one of us, emea; got {region}");
                }
                Some(region)
            }
            None => None,
        };
        let log_json = non_empty("APS_MIRROR_LOG_JSON")
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false);

        Ok(Self {
            database_url,
            api_base_url,
            refresh_margin,
            oauth_scope,
            translation_region,
            log_json,
        })
    }

    pub async fn open_store(&self) -> Result<MirrorStore, StoreError> {
        match &self.database_url {
            Some(url) => MirrorStore::new(url).await,
            None => MirrorStore::new_default().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<MirrorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MirrorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.refresh_margin, Duration::from_secs(300));
        assert_eq!(config.oauth_scope, "data:read data:write");
        assert_eq!(config.translation_region, None);
        assert!(!config.log_json);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("APS_MIRROR_DATABASE_URL", "sqlite:///tmp/m.db"),
            ("APS_API_BASE_URL", "http://127.0.0.1:9000"),
            ("APS_TOKEN_REFRESH_MARGIN_SECS", "0"),
            ("APS_TRANSLATION_REGION", "EMEA"),
            ("APS_MIRROR_LOG_JSON", "1"),
            ("APS_OAUTH_SCOPE", "  data:read   viewables:read "),
        ])
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/m.db"));
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.refresh_margin, Duration::ZERO);
        assert_eq!(config.translation_region.as_deref(), Some("emea"));
        assert!(config.log_json);
        assert_eq!(config.oauth_scope, "data:read viewables:read");
    }

    #[test]
    fn unparsable_margin_falls_back_to_default() {
        let config = config_from(&[("APS_TOKEN_REFRESH_MARGIN_SECS", "soon")]).unwrap();
        assert_eq!(config.refresh_margin, Duration::from_secs(300));
    }

    #[test]
    fn rejects_unknown_region() {
        assert!(config_from(&[("APS_TRANSLATION_REGION", "apac")]).is_err());
    }
}
