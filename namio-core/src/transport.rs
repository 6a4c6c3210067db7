use crate::error::{NamioError, Result};
use crate::path::DfsPath;
use crate::tree::CommandHandle;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Outbound directive interface of a storage node.
///
/// `create` and `delete` ask the node to materialize or remove a path on its
/// local disk; both report whether the node actually changed anything.
#[async_trait]
pub trait DirectiveTransport: Send + Sync {
    async fn create(&self, node: &CommandHandle, path: &DfsPath) -> Result<bool>;
    async fn delete(&self, node: &CommandHandle, path: &DfsPath) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct DirectiveResponse {
    done: bool,
}

/// Directive transport over HTTP: `POST http://{node}/command/{create,delete}`
/// with the path in a JSON body, expecting `{"done": bool}` back.
pub struct HttpDirectiveTransport {
    client: reqwest::Client,
}

impl HttpDirectiveTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NamioError::Http(error.to_string()))?;
        Ok(Self { client })
    }

    async fn send(&self, node: &CommandHandle, directive: &str, path: &DfsPath) -> Result<bool> {
        let url = format!("http://{}/command/{}", node.address, directive);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "path": path.to_string() }))
            .send()
            .await
            .map_err(|error| NamioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(NamioError::Http(format!(
                "storage node {} returned {} for {} {}",
                node.address,
                response.status(),
                directive,
                path
            )));
        }

        let payload: DirectiveResponse = response
            .json()
            .await
            .map_err(|error| NamioError::Http(error.to_string()))?;
        Ok(payload.done)
    }
}

#[async_trait]
impl DirectiveTransport for HttpDirectiveTransport {
    async fn create(&self, node: &CommandHandle, path: &DfsPath) -> Result<bool> {
        self.send(node, "create", path).await
    }

    async fn delete(&self, node: &CommandHandle, path: &DfsPath) -> Result<bool> {
        self.send(node, "delete", path).await
    }
}
