//! Configuration loading for the assistant
//!
//! Two things are configured:
//! - [`AssistantConfig`]: backend URL and timeouts (`assistant.json`)
//! - [`GoogleCredentials`]: OAuth client used for sign-in, loaded from (in
//!   order of priority) compile-time environment, `google-credentials.json`,
//!   then runtime environment variables

use anyhow::{Context, Result};
use config::ConfigDir;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Settings filename in the Mailpilot config directory
pub const SETTINGS_FILE: &str = "assistant.json";

/// Credentials filename in the Mailpilot config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Overrides `api_base_url` when set
pub const API_BASE_URL_ENV: &str = "MAILPILOT_API_BASE_URL";

/// Backend URL and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_base_url: String,
    /// Per-call timeout for agent requests and backend HTTP calls
    pub request_timeout_secs: u64,
    /// Upper bound on the interactive sign-in flow
    pub oauth_timeout_secs: u64,
    /// How long a page agent waits for the webmail UI to appear
    pub anchor_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
            oauth_timeout_secs: 300,
            anchor_timeout_secs: 30,
        }
    }
}

impl AssistantConfig {
    /// Load `assistant.json` (defaults when absent), then apply env overrides
    pub fn load(dir: &ConfigDir) -> Result<Self> {
        let mut config: Self = dir.load_json_opt(SETTINGS_FILE)?.unwrap_or_default();
        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the base URL and normalize away a trailing slash
    pub fn validate(&mut self) -> Result<()> {
        let parsed = Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("api_base_url must be http or https: {}", self.api_base_url);
        }
        while self.api_base_url.ends_with('/') {
            self.api_base_url.pop();
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn oauth_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth_timeout_secs)
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_secs(self.anchor_timeout_secs)
    }
}

/// OAuth client for Google sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GoogleCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. `google-credentials.json` in the config directory
    /// 3. Runtime environment variables
    pub fn load(dir: &ConfigDir) -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if dir.exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = dir.load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}
