//! Fetching the runtime version and fresh schema documents.
//!
//! The node answers the two JSON-RPC calls; the type dictionaries are
//! plain JSON files served over HTTPS.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nw_domain::config::RuntimeConfig;
use nw_protocol::{RpcCall, RuntimeVersion, STATE_GET_METADATA, STATE_GET_RUNTIME_VERSION};
use nw_rpc::{execute, JsonMapper, RpcExecutor};

use crate::error::RuntimeError;
use crate::store::SchemaDocuments;

#[async_trait]
pub trait RemoteSchemaSource: Send + Sync {
    async fn runtime_version(&self, cancel: &CancellationToken) -> Result<RuntimeVersion, RuntimeError>;

    /// Metadata plus both type dictionaries.  Fails as a whole if any one
    /// of them cannot be fetched.
    async fn fetch_documents(&self, cancel: &CancellationToken) -> Result<SchemaDocuments, RuntimeError>;
}

pub struct NodeSchemaSource {
    executor: Arc<dyn RpcExecutor>,
    http: reqwest::Client,
    types_base_url: String,
    network: String,
}

impl NodeSchemaSource {
    pub fn new(executor: Arc<dyn RpcExecutor>, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .map_err(|e| RuntimeError::Http {
                url: config.types_base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self::with_client(
            executor,
            http,
            config.types_base_url.clone(),
            config.network.clone(),
        ))
    }

    pub fn with_client(
        executor: Arc<dyn RpcExecutor>,
        http: reqwest::Client,
        types_base_url: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            http,
            types_base_url: types_base_url.into(),
            network: network.into(),
        }
    }

    pub fn base_types_url(&self) -> String {
        format!("{}/default.json", self.types_base_url.trim_end_matches('/'))
    }

    pub fn network_types_url(&self) -> String {
        format!("{}/{}.json", self.types_base_url.trim_end_matches('/'), self.network)
    }

    async fn metadata(&self, cancel: &CancellationToken) -> Result<String, RuntimeError> {
        let blob: String = execute(
            self.executor.as_ref(),
            RpcCall::bare(STATE_GET_METADATA),
            &JsonMapper::new(),
            cancel,
        )
        .await?;
        Ok(blob)
    }

    async fn get_text(&self, url: String, cancel: &CancellationToken) -> Result<String, RuntimeError> {
        let http_err = |message: String| RuntimeError::Http {
            url: url.clone(),
            message,
        };
        let request = async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| http_err(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(http_err(format!("status {status}")));
            }
            response.text().await.map_err(|e| http_err(e.to_string()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
            r = request => r,
        }
    }
}

#[async_trait]
impl RemoteSchemaSource for NodeSchemaSource {
    async fn runtime_version(&self, cancel: &CancellationToken) -> Result<RuntimeVersion, RuntimeError> {
        let version = execute(
            self.executor.as_ref(),
            RpcCall::bare(STATE_GET_RUNTIME_VERSION),
            &JsonMapper::<RuntimeVersion>::new(),
            cancel,
        )
        .await?;
        Ok(version)
    }

    async fn fetch_documents(&self, cancel: &CancellationToken) -> Result<SchemaDocuments, RuntimeError> {
        let (metadata, base_types, network_types) = tokio::try_join!(
            self.metadata(cancel),
            self.get_text(self.base_types_url(), cancel),
            self.get_text(self.network_types_url(), cancel),
        )?;
        tracing::info!(
            metadata_len = metadata.len(),
            network = %self.network,
            "fetched schema documents"
        );
        Ok(SchemaDocuments {
            metadata,
            base_types,
            network_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nw_rpc::RpcError;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers the two node calls from memory.
    struct FakeNode;

    #[async_trait]
    impl RpcExecutor for FakeNode {
        async fn call_raw(&self, call: RpcCall, _cancel: &CancellationToken) -> Result<Value, RpcError> {
            match call.method.as_str() {
                STATE_GET_METADATA => Ok(json!("0x6d657461")),
                STATE_GET_RUNTIME_VERSION => Ok(json!({ "specName": "sora", "specVersion": 57 })),
                other => Err(RpcError::Node {
                    code: -32601,
                    message: format!("{other} not found"),
                }),
            }
        }
    }

    /// Serves `/default.json` and `/sora.json`; anything else is a 404.
    async fn type_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head);
                    let (status, body) = if head.starts_with("GET /types/default.json ") {
                        ("200 OK", r#"{"types":{"Balance":"u128"}}"#)
                    } else if head.starts_with("GET /types/sora.json ") {
                        ("200 OK", r#"{"types":{}}"#)
                    } else {
                        ("404 Not Found", "")
                    };
                    let reply = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(reply.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}/types/")
    }

    #[tokio::test]
    async fn fetches_all_three_documents() {
        let base = type_server().await;
        let source = NodeSchemaSource::with_client(Arc::new(FakeNode), reqwest::Client::new(), base, "sora");
        let cancel = CancellationToken::new();

        assert_eq!(source.runtime_version(&cancel).await.unwrap().spec_version, 57);
        let docs = source.fetch_documents(&cancel).await.unwrap();
        assert_eq!(docs.metadata, "0x6d657461");
        assert!(docs.base_types.contains("Balance"));
        assert_eq!(docs.network_types, r#"{"types":{}}"#);
    }

    #[tokio::test]
    async fn missing_network_document_fails_the_fetch() {
        let base = type_server().await;
        let source =
            NodeSchemaSource::with_client(Arc::new(FakeNode), reqwest::Client::new(), base, "nowhere");
        let err = source.fetch_documents(&CancellationToken::new()).await.unwrap_err();
        assert!(
            matches!(err, RuntimeError::Http { ref url, ref message } if url.ends_with("/nowhere.json") && message.contains("404")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_cancelled() {
        let base = type_server().await;
        let source = NodeSchemaSource::with_client(Arc::new(FakeNode), reqwest::Client::new(), base, "sora");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source.get_text(source.base_types_url(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn document_urls_ignore_a_trailing_slash() {
        let source =
            NodeSchemaSource::with_client(Arc::new(FakeNode), reqwest::Client::new(), "https://x/types/", "sora");
        assert_eq!(source.base_types_url(), "https://x/types/default.json");
        assert_eq!(source.network_types_url(), "https://x/types/sora.json");
    }
}
