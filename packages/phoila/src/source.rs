//! Byte sources for a notebook's render stream.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use replay_stream::SourceError;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::RequestError;

pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Opens the render stream for a notebook path.
#[async_trait]
pub trait NotebookSource: Send + Sync {
    async fn open(&self, notebook_path: &str) -> Result<ByteStream, RequestError>;
}

/// Issue `GET <base>/voila/render/<path>` and hand back the body as a chunk
/// stream. A non-success status fails with `"<status> (<reason>)"`.
pub async fn request_render(
    client: &reqwest::Client,
    config: &ServerConfig,
    notebook_path: &str,
) -> Result<ByteStream, RequestError> {
    let url = config.endpoint(["voila", "render", notebook_path])?;
    info!(%url, "requesting render stream");

    let response = config.authorize(client.get(url)).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RequestError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(SourceError::from))
        .boxed())
}

pub struct HttpNotebookSource {
    client: reqwest::Client,
    config: ServerConfig,
}

impl HttpNotebookSource {
    pub fn new(client: reqwest::Client, config: ServerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotebookSource for HttpNotebookSource {
    async fn open(&self, notebook_path: &str) -> Result<ByteStream, RequestError> {
        request_render(&self.client, &self.config, notebook_path).await
    }
}

/// Reads recorded render streams (`.ndjson` captures) from a directory.
pub struct FileNotebookSource {
    root: PathBuf,
}

impl FileNotebookSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl NotebookSource for FileNotebookSource {
    async fn open(&self, notebook_path: &str) -> Result<ByteStream, RequestError> {
        let path = self.root.join(notebook_path);
        debug!(path = %path.display(), "opening recorded stream");
        let file = tokio::fs::File::open(&path).await?;
        Ok(ReaderStream::new(file)
            .map(|chunk| chunk.map_err(SourceError::from))
            .boxed())
    }
}
