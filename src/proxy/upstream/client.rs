// Thin outbound HTTP client. One reqwest::Client shared by every request,
// with the optional forward proxy and the per-request timeout baked in at
// construction.

use bytes::Bytes;
use reqwest::{Client, Proxy, StatusCode};
use tracing::{debug, info};

use crate::constants::{CACHE_DELETE_TIMEOUT, GEMINI_BASE_URL, UPSTREAM_TIMEOUT};
use crate::error::{RelayError, RelayResult};
use crate::proxy::mappers::gemini::{
    CreateCacheRequest, CreateCacheResponse, GeminiTool, GoogleContent, GoogleRequest,
};
use crate::proxy::mappers::openai::OpenAiRequest;

pub struct UpstreamClient {
    client: Client,
    gemini_base_url: String,
}

impl UpstreamClient {
    pub fn new(proxy: Option<&str>) -> RelayResult<Self> {
        Self::with_base_url(proxy, GEMINI_BASE_URL)
    }

    fn with_base_url(proxy: Option<&str>, gemini_base_url: &str) -> RelayResult<Self> {
        let mut builder = Client::builder().timeout(UPSTREAM_TIMEOUT);
        if let Some(url) = proxy.filter(|u| !u.is_empty()) {
            builder = builder.proxy(Proxy::all(url)?);
            info!("Outbound proxy enabled: {}", url);
        }
        Ok(Self {
            client: builder.build()?,
            gemini_base_url: gemini_base_url.to_string(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base_url: &str) -> Self {
        Self::with_base_url(None, base_url).expect("test client")
    }

    pub async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        request: &GoogleRequest,
    ) -> Result<(StatusCode, Bytes), reqwest::Error> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.gemini_base_url, model, api_key
        );
        debug!("POST {}:generateContent", model);
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }

    pub async fn create_cached_content(
        &self,
        api_key: &str,
        model: &str,
        system_instruction: Option<&GoogleContent>,
        tools: Option<&[GeminiTool]>,
        contents: &[GoogleContent],
    ) -> RelayResult<String> {
        let url = format!("{}/cachedContents?key={}", self.gemini_base_url, api_key);
        let request = CreateCacheRequest {
            model: format!("models/{}", model),
            system_instruction,
            tools,
            contents,
            ttl: crate::constants::CACHE_SERVER_TTL,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Cache(format!(
                "create returned {}: {}",
                status, body
            )));
        }

        let created: CreateCacheResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Cache(format!("create response unreadable: {}", e)))?;
        Ok(created.name)
    }

    // Best-effort DELETE with a short timeout; used on stale rebuild and at
    // shutdown.
    pub async fn delete_cached_content(&self, api_key: &str, name: &str) -> RelayResult<()> {
        let url = format!("{}/{}?key={}", self.gemini_base_url, name, api_key);
        let response = self
            .client
            .delete(&url)
            .timeout(CACHE_DELETE_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Cache(format!(
                "delete returned {}: {}",
                status, body
            )));
        }
        debug!("Deleted cached content: {}", name);
        Ok(())
    }

    pub async fn chat_completions(
        &self,
        endpoint: &str,
        api_key: &str,
        request: &OpenAiRequest,
    ) -> Result<(StatusCode, Bytes), reqwest::Error> {
        debug!("POST {} (model: {})", endpoint, request.model);
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }
}
