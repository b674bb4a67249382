use crate::{env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PUBSUB_URL: &str = "https://pubsub.googleapis.com";
pub const DEFAULT_MONITORING_URL: &str = "https://monitoring.googleapis.com";

/// Endpoints and credentials for the Pub/Sub and Cloud Monitoring REST APIs.
#[derive(Clone, Debug)]
pub struct GcpConfig {
    /// Default project when none is passed on the command line
    pub project_id: Option<String>,
    pub pubsub_url: String,
    pub monitoring_url: String,
    /// `host:port` of a local Pub/Sub emulator; disables authentication
    pub emulator_host: Option<String>,
    /// Pre-minted bearer token (e.g. `gcloud auth print-access-token`)
    pub access_token: Option<String>,
    /// Authorized-user credentials file used to mint tokens
    pub credentials_file: Option<PathBuf>,
    pub http_timeout: Duration,
}

impl GcpConfig {
    pub fn uses_emulator(&self) -> bool {
        self.emulator_host.is_some()
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_emulator(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.pubsub_url = format!("http://{}", host);
        self.emulator_host = Some(host);
        self
    }
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            pubsub_url: DEFAULT_PUBSUB_URL.to_string(),
            monitoring_url: DEFAULT_MONITORING_URL.to_string(),
            emulator_host: None,
            access_token: None,
            credentials_file: None,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// gcloud's application-default credentials location.
fn default_credentials_file() -> Option<PathBuf> {
    let home = env_optional("HOME")?;
    let path = PathBuf::from(home).join(".config/gcloud/application_default_credentials.json");
    path.exists().then_some(path)
}

impl FromEnv for GcpConfig {
    /// Reads:
    /// - `GCP_PROJECT_ID`
    /// - `PUBSUB_EMULATOR_HOST` (overrides `PUBSUB_API_URL`)
    /// - `PUBSUB_API_URL`, `MONITORING_API_URL`
    /// - `GCP_ACCESS_TOKEN`, `GOOGLE_APPLICATION_CREDENTIALS`
    /// - `GCP_HTTP_TIMEOUT_SECS` (default 30)
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 = env_parse("GCP_HTTP_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "GCP_HTTP_TIMEOUT_SECS",
                "must be greater than 0",
            ));
        }

        let config = Self {
            project_id: env_optional("GCP_PROJECT_ID"),
            pubsub_url: env_or_default("PUBSUB_API_URL", DEFAULT_PUBSUB_URL),
            monitoring_url: env_or_default("MONITORING_API_URL", DEFAULT_MONITORING_URL),
            emulator_host: None,
            access_token: env_optional("GCP_ACCESS_TOKEN"),
            credentials_file: env_optional("GOOGLE_APPLICATION_CREDENTIALS")
                .map(PathBuf::from)
                .or_else(default_credentials_file),
            http_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(match env_optional("PUBSUB_EMULATOR_HOST") {
            Some(host) => config.with_emulator(host),
            None => config,
        })
    }
}
