//! Client for the external text-generation API.
//! One synchronous (non-streaming) POST per call; no retry and no timeout.

use crate::config::{self, Config};
use crate::gateway::protocol::{
    ChatTurn, GenerationInput, GenerationParameters, GenerationRequest,
};

/// Client for the upstream completion endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    endpoint: String,
    api_key: String,
    model: String,
    parameters: GenerationParameters,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Non-success status; body is the raw upstream text.
    #[error("upstream api error: {status} {body}")]
    Upstream { status: u16, body: String },
    #[error("upstream connection failed: {0}")]
    Connection(#[from] reqwest::Error),
    /// Success status but the body is not JSON.
    #[error("upstream returned invalid JSON: {0}")]
    Decode(reqwest::Error),
}

impl UpstreamClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        parameters: GenerationParameters,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            parameters,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config; fails when no API key is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config::resolve_api_key(config).ok_or_else(|| {
            anyhow::anyhow!("no upstream API key (set upstream.apiKey or DASHSCOPE_API_KEY)")
        })?;
        let up = &config.upstream;
        Ok(Self::new(
            up.endpoint.trim(),
            api_key,
            up.model.trim(),
            GenerationParameters {
                temperature: up.temperature,
                max_tokens: up.max_tokens,
                top_p: up.top_p,
            },
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, messages: &[ChatTurn]) -> Result<reqwest::Response, UpstreamError> {
        let body = GenerationRequest {
            model: &self.model,
            input: GenerationInput { messages },
            parameters: self.parameters,
        };
        log::debug!(
            "upstream request: model={} turns={}",
            self.model,
            messages.len()
        );
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-SSE", "disable")
            .json(&body)
            .send()
            .await?;
        Ok(res)
    }

    /// Forward the turns; on success return the upstream JSON unchanged.
    pub async fn generate(
        &self,
        messages: &[ChatTurn],
    ) -> Result<serde_json::Value, UpstreamError> {
        let res = self.post(messages).await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Upstream { status, body });
        }
        res.json().await.map_err(UpstreamError::Decode)
    }

    /// Forward the turns and return the status and body whatever the status is.
    /// A body that is not JSON comes back as `null`.
    pub async fn probe(
        &self,
        messages: &[ChatTurn],
    ) -> Result<(u16, serde_json::Value), UpstreamError> {
        let res = self.post(messages).await?;
        let status = res.status().as_u16();
        let text = res.text().await?;
        let data = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        Ok((status, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_api_key() {
        let mut config = Config::default();
        if std::env::var("DASHSCOPE_API_KEY").is_err() {
            assert!(UpstreamClient::from_config(&config).is_err());
        }
        config.upstream.api_key = Some("sk-test".to_string());
        config.upstream.endpoint = " http://127.0.0.1:9/gen ".to_string();
        let client = UpstreamClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/gen");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_error() {
        let client = UpstreamClient::new(
            "http://127.0.0.1:9/gen",
            "sk-test",
            "qwen-turbo",
            GenerationParameters {
                temperature: 0.7,
                max_tokens: 2000,
                top_p: 0.8,
            },
        );
        let err = client.generate(&[ChatTurn::user("hi")]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Connection(_)));
    }

    #[tokio::test]
    async fn non_json_success_body_is_decode_error() {
        let app = axum::Router::new().route(
            "/gen",
            axum::routing::post(|| async { "<html>maintenance</html>" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = UpstreamClient::new(
            format!("http://{}/gen", addr),
            "sk-test",
            "qwen-turbo",
            GenerationParameters {
                temperature: 0.7,
                max_tokens: 2000,
                top_p: 0.8,
            },
        );
        let err = client.generate(&[ChatTurn::user("hi")]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)), "{:?}", err);

        let (status, body) = client.probe(&[ChatTurn::user("hi")]).await.unwrap();
        assert_eq!(status, 200);
        assert!(body.is_null());
    }
}
