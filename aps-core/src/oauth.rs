use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";
const AUTHORIZE_SEGMENTS: [&str; 3] = ["authentication", "v2", "authorize"];
const TOKEN_SEGMENTS: [&str; 3] = ["authentication", "v2", "token"];

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// A grant sent to the v2 token endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Grant<'a> {
    AuthorizationCode {
        code: &'a str,
        redirect_uri: &'a str,
    },
    /// `scope` may narrow the scopes of the original grant, never widen them.
    RefreshToken {
        refresh_token: &'a str,
        scope: Option<&'a str>,
    },
}

impl Grant<'_> {
    fn form(&self) -> Vec<(&'static str, &str)> {
        match *self {
            Grant::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                let mut form = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ];
                if let Some(scope) = scope {
                    form.push(("scope", scope));
                }
                form
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Three-legged APS OAuth client. The confidential client authenticates to
/// the token endpoint with HTTP Basic credentials.
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, client_id, client_secret)
    }

    pub fn with_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(OAuthError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Builds the login URL an operator opens in a browser. `scope` is a
    /// space-separated APS scope list such as `data:read data:write`.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
        state: Option<&str>,
    ) -> Result<Url, OAuthError> {
        let mut url = self.endpoint(&AUTHORIZE_SEGMENTS)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri);
        if let Some(scope) = scope {
            url.query_pairs_mut().append_pair("scope", scope);
        }
        if let Some(state) = state {
            url.query_pairs_mut().append_pair("state", state);
        }
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthToken, OAuthError> {
        self.request_token(Grant::AuthorizationCode { code, redirect_uri })
            .await
    }

    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<OAuthToken, OAuthError> {
        self.request_token(Grant::RefreshToken {
            refresh_token,
            scope,
        })
        .await
    }

    pub async fn request_token(&self, grant: Grant<'_>) -> Result<OAuthToken, OAuthError> {
        let url = self.endpoint(&TOKEN_SEGMENTS)?;
        tracing::debug!(grant = grant.name(), "requesting aps token");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&grant.form())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Api { status, body });
        }
        Ok(response.json::<OAuthToken>().await?)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, OAuthError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OAuthError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Only present when the provider rotated the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}
