//! Bearer tokens for Google APIs.
//!
//! Three sources, picked from [`GcpConfig`] in this order:
//!
//! 1. Emulator: no token at all.
//! 2. `GCP_ACCESS_TOKEN`: used as-is, never refreshed.
//! 3. An `authorized_user` credentials file (what `gcloud auth
//!    application-default login` writes): the refresh token is exchanged at
//!    the OAuth2 token endpoint and the access token cached until shortly
//!    before it expires.

use crate::error::GatewayError;
use core_config::gcp::GcpConfig;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens closer than this to expiry are refreshed.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct AuthorizedUserCredentials {
    #[serde(rename = "type")]
    kind: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

enum TokenSource {
    Anonymous,
    Static(String),
    AuthorizedUser(AuthorizedUserCredentials),
}

/// Supplies the `Authorization` bearer token for outgoing requests.
pub struct AccessTokenProvider {
    source: TokenSource,
    client: Client,
    cache: RwLock<Option<CachedToken>>,
}

impl AccessTokenProvider {
    /// Provider for unauthenticated endpoints such as the Pub/Sub emulator.
    pub fn anonymous() -> Self {
        Self::with_source(TokenSource::Anonymous, Client::new())
    }

    pub fn from_static(token: impl Into<String>) -> Self {
        Self::with_source(TokenSource::Static(token.into()), Client::new())
    }

    /// Pick a token source from configuration.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Auth`] when no credentials are configured or the
    /// credentials file is unreadable or not an `authorized_user` file.
    pub fn from_config(config: &GcpConfig, client: Client) -> Result<Self, GatewayError> {
        if config.uses_emulator() {
            info!("Pub/Sub emulator configured, requests are not authenticated");
            return Ok(Self::with_source(TokenSource::Anonymous, client));
        }

        if let Some(token) = &config.access_token {
            debug!("Using static access token");
            return Ok(Self::with_source(TokenSource::Static(token.clone()), client));
        }

        match &config.credentials_file {
            Some(path) => {
                let credentials = load_credentials(path)?;
                debug!(path = %path.display(), "Using authorized user credentials");
                Ok(Self::with_source(
                    TokenSource::AuthorizedUser(credentials),
                    client,
                ))
            }
            None => Err(GatewayError::auth(
                "no credentials found: set GCP_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS",
            )),
        }
    }

    fn with_source(source: TokenSource, client: Client) -> Self {
        Self {
            source,
            client,
            cache: RwLock::new(None),
        }
    }

    /// Current bearer token, or `None` for anonymous access.
    pub async fn token(&self) -> Result<Option<String>, GatewayError> {
        match &self.source {
            TokenSource::Anonymous => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::AuthorizedUser(credentials) => {
                self.cached_or_refresh(credentials).await.map(Some)
            }
        }
    }

    async fn cached_or_refresh(
        &self,
        credentials: &AuthorizedUserCredentials,
    ) -> Result<String, GatewayError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| is_fresh(c, Instant::now())) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| is_fresh(c, Instant::now())) {
            return Ok(cached.access_token.clone());
        }

        let token = self.refresh(credentials).await?;
        let access_token = token.access_token.clone();
        *cache = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    async fn refresh(
        &self,
        credentials: &AuthorizedUserCredentials,
    ) -> Result<TokenResponse, GatewayError> {
        debug!("Refreshing access token");

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::auth(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GatewayError::parse(format!("token response: {e}")))
    }
}

fn is_fresh(token: &CachedToken, now: Instant) -> bool {
    token.expires_at > now + EXPIRY_MARGIN
}

fn load_credentials(path: &Path) -> Result<AuthorizedUserCredentials, GatewayError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::auth(format!(
            "cannot read credentials file {}: {e}",
            path.display()
        ))
    })?;
    parse_credentials(&raw)
}

fn parse_credentials(raw: &str) -> Result<AuthorizedUserCredentials, GatewayError> {
    let credentials: AuthorizedUserCredentials = serde_json::from_str(raw)
        .map_err(|e| GatewayError::auth(format!("invalid credentials file: {e}")))?;

    if credentials.kind != "authorized_user" {
        return Err(GatewayError::auth(format!(
            "unsupported credentials type '{}', use GCP_ACCESS_TOKEN instead",
            credentials.kind
        )));
    }
    Ok(credentials)
}
