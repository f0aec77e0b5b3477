//! Connecting to the kernel named by a stream's connection descriptor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::ConnectError;

/// A live kernel the session's widgets talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConnection {
    pub id: String,
    pub name: String,
    pub execution_state: Option<String>,
    /// Websocket endpoint for the kernel's message channels.
    pub channels_url: String,
}

#[async_trait]
pub trait KernelConnector: Send + Sync {
    async fn connect(&self, kernel_id: &str) -> Result<KernelConnection, ConnectError>;
}

/// Looks the kernel up through the server's REST API.
pub struct HttpKernelConnector {
    client: reqwest::Client,
    config: ServerConfig,
}

#[derive(Deserialize)]
struct KernelModel {
    id: String,
    name: String,
    #[serde(default)]
    execution_state: Option<String>,
}

impl HttpKernelConnector {
    pub fn new(client: reqwest::Client, config: ServerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl KernelConnector for HttpKernelConnector {
    async fn connect(&self, kernel_id: &str) -> Result<KernelConnection, ConnectError> {
        let url = self
            .config
            .endpoint(["api", "kernels", kernel_id])
            .map_err(|e| ConnectError::Request(e.to_string()))?;
        debug!(%url, "looking up kernel");

        let response = self
            .config
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ConnectError::NotFound {
                kernel_id: kernel_id.to_string(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| ConnectError::Request(e.to_string()))?;
        let model: KernelModel = response
            .json()
            .await
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        let channels_url = self
            .config
            .websocket_endpoint(["api", "kernels", &model.id, "channels"])
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        Ok(KernelConnection {
            id: model.id,
            name: model.name,
            execution_state: model.execution_state,
            channels_url: channels_url.to_string(),
        })
    }
}

/// For offline replays: every handoff fails with [`ConnectError::Disabled`].
pub struct NoKernel;

#[async_trait]
impl KernelConnector for NoKernel {
    async fn connect(&self, _kernel_id: &str) -> Result<KernelConnection, ConnectError> {
        Err(ConnectError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_model_tolerates_missing_state() {
        let model: KernelModel =
            serde_json::from_str(r#"{"id": "k1", "name": "python3", "connections": 0}"#).unwrap();
        assert_eq!(model.id, "k1");
        assert!(model.execution_state.is_none());
    }

    #[tokio::test]
    async fn no_kernel_refuses() {
        assert_eq!(NoKernel.connect("k1").await, Err(ConnectError::Disabled));
    }
}
