use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::RequestError;
use crate::extract::DEFAULT_OUTPUT_MIME_TYPE;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    base_url = "http://localhost:8866/"
//
//   env var:         PHOILA_SERVER__BASE_URL=http://localhost:8866/
//
//   (single underscore stays within field names: PHOILA_SERVER__CONNECT_TIMEOUT_SECS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub stream: StreamFileConfig,
}

/// Where the notebook server lives (`[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Render stream knobs (`[stream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default = "default_output_mime_type")]
    pub output_mime_type: String,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            output_mime_type: default_output_mime_type(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8888/".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_output_mime_type() -> String {
    DEFAULT_OUTPUT_MIME_TYPE.to_string()
}

/// Build the layered config: defaults → config.toml → env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("PHOILA_").split("__"))
}

// =============================================================================
// Runtime config views
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub base_url: Url,
    /// Sent as `Authorization: token <token>`
    pub token: Option<String>,
    pub connect_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let base_url = Url::parse(&fc.base_url)
            .with_context(|| format!("Invalid server base URL: {}", fc.base_url))?;
        Ok(Self {
            base_url,
            token: fc.token.clone().filter(|t| !t.is_empty()),
            connect_timeout: if fc.connect_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.connect_timeout_secs))
            },
        })
    }

    /// `base_url` with `segments` appended. Segments containing `/` are split
    /// so notebook paths in subdirectories keep their structure.
    pub fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RequestError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.split('/').filter(|part| !part.is_empty()));
            }
        }
        Ok(url)
    }

    /// Like [`ServerConfig::endpoint`] with the scheme switched to `ws`/`wss`.
    pub fn websocket_endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, RequestError> {
        let mut url = self.endpoint(segments)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| RequestError::InvalidUrl(url.to_string()))?;
        Ok(url)
    }

    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("token {token}")),
            None => request,
        }
    }

    pub fn build_client(&self) -> Result<reqwest::Client, RequestError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Script type marking embedded output blocks
    pub output_mime_type: String,
}

impl StreamConfig {
    pub fn from_file(fc: &StreamFileConfig) -> Self {
        Self {
            output_mime_type: fc.output_mime_type.clone(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_file(&StreamFileConfig::default())
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --config-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PhoilaDirs {
    pub config_dir: PathBuf,
}

impl PhoilaDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".phoila"),
        };

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        info!("Config directory: {}", config_dir.display());

        Ok(Self { config_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
