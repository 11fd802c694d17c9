use tracing::debug;

use crate::config::{AuthScheme, HttpClientConfig};
use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;

use super::{ChunkStream, ChunkTransport, TransportRequest, decode_sse_stream};

/// `reqwest`-based transport that POSTs the run's body and decodes the SSE
/// response.
pub struct HttpSseTransport {
    provider: ProviderId,
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpSseTransport {
    pub fn new(provider: impl Into<ProviderId>, config: HttpClientConfig) -> Result<Self, HarnessError> {
        let provider = provider.into();
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(format!(
                "{provider} client config api_key must not be empty"
            )));
        }
        // no total deadline: a healthy stream may run for minutes
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(read_timeout) = config.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }
        let client = builder
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build {provider} client: {e}")))?;
        Ok(Self {
            provider,
            client,
            config,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ChunkTransport for HttpSseTransport {
    async fn open(&self, request: &TransportRequest) -> Result<ChunkStream, ProviderError> {
        let url = self.config.url();
        debug!(
            run_id = %request.run_id,
            session_id = %request.session_id,
            provider = %self.provider,
            model = %request.model.model,
            %url,
            "opening SSE stream"
        );

        let mut http_req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        http_req = match &self.config.auth {
            AuthScheme::Bearer => http_req.bearer_auth(&self.config.api_key),
            AuthScheme::Header(name) => http_req.header(name.as_str(), self.config.api_key.as_str()),
        };
        for (name, value) in &self.config.extra_headers {
            http_req = http_req.header(name.as_str(), value.as_str());
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::transport(self.provider.clone(), format!("request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                self.provider.clone(),
                format!("request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        Ok(decode_sse_stream(self.provider.clone(), response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt as _;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use crate::transport::NativeChunk;

    #[test]
    fn empty_api_key_is_a_config_error() {
        let result = HttpSseTransport::new("openai", HttpClientConfig::openai("  "));
        assert!(matches!(result, Err(HarnessError::Config(msg)) if msg.contains("api_key")));
    }

    /// Serves one SSE response whose frames are spaced `gap` apart.
    async fn slow_sse_server(frames: usize, gap: Duration) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = vec![0_u8; 8192];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .expect("head");
            for i in 0..frames {
                tokio::time::sleep(gap).await;
                let frame = format!("data: {{\"n\":{i}}}\n\n");
                if socket.write_all(frame.as_bytes()).await.is_err() {
                    return;
                }
            }
            let _ = socket.shutdown().await;
        });
        addr
    }

    #[tokio::test]
    async fn long_stream_outlives_connect_and_read_timeouts() {
        let addr = slow_sse_server(10, Duration::from_millis(100)).await;
        let transport = HttpSseTransport::new(
            "local",
            HttpClientConfig::openai("k")
                .base_url(format!("http://{addr}"))
                .connect_timeout(Duration::from_millis(300))
                .read_timeout(Duration::from_millis(300)),
        )
        .expect("transport");
        let request = TransportRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: "s".into(),
            model: crate::model::ModelRef::new("local", "m"),
            body: serde_json::json!({"stream": true}),
        };
        let frames: Vec<_> = transport
            .open(&request)
            .await
            .expect("open")
            .collect()
            .await;
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(Result::is_ok), "{frames:?}");
        assert_eq!(frames[9], Ok(NativeChunk::data("{\"n\":9}")));
    }

    #[test]
    fn keeps_the_configured_endpoint() {
        let transport = HttpSseTransport::new(
            "local",
            HttpClientConfig::openai("k").base_url("http://localhost:9999"),
        )
        .expect("transport");
        assert_eq!(transport.config().url(), "http://localhost:9999/v1/chat/completions");
    }
}
