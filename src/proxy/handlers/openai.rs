// OpenAI-compatible relay path: translate → TPM admission → chat completions
// → symmetric post-hoc correction → Anthropic-style reply.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info};

use super::{
    admit, forward_upstream_error, json_response, new_trace_id, parse_generic_request,
    resolve_credential, AdmittedEstimate,
};
use crate::proxy::mappers::openai::{build_client_response, build_openai_request, OpenAiResponse};
use crate::proxy::rate_limit::CorrectionPolicy;
use crate::proxy::state::AppState;

pub async fn handle(state: AppState, headers: HeaderMap, body: Bytes) -> Response {
    let trace_id = new_trace_id();

    let Some(api_key) = resolve_credential(&headers, state.config.api_key.as_deref()) else {
        error!("[{}] No API key in headers and no --key fallback", trace_id);
        return (StatusCode::UNAUTHORIZED, "Missing API Key").into_response();
    };

    let Some(endpoint) = state.config.endpoint.clone() else {
        error!("[{}] OpenAI path started without an endpoint", trace_id);
        return (StatusCode::INTERNAL_SERVER_ERROR, "No upstream endpoint configured")
            .into_response();
    };

    let request = match parse_generic_request(&trace_id, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    debug!(
        "[{}] Relaying request for model {} ({} messages)",
        trace_id,
        request.model,
        request.messages.len()
    );

    let openai_request = build_openai_request(&request);

    let mut estimate: Option<AdmittedEstimate> = None;
    if let Some(limiter) = &state.limiter {
        match admit(limiter, &state.calibrator, body.len(), &trace_id).await {
            Ok(admitted) => estimate = Some(admitted),
            Err(response) => return response,
        }
    }

    let (status, upstream_body) = match state
        .upstream
        .chat_completions(&endpoint, &api_key, &openai_request)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            error!("[{}] Upstream transport failure: {}", trace_id, e);
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    if status != StatusCode::OK {
        error!(
            "[{}] Upstream returned {}: {}",
            trace_id,
            status,
            String::from_utf8_lossy(&upstream_body)
        );
        return forward_upstream_error(status, upstream_body);
    }

    let openai_response: OpenAiResponse = match serde_json::from_slice(&upstream_body) {
        Ok(response) => response,
        Err(e) => {
            error!(
                "[{}] Failed to parse OpenAI-compatible response: {}",
                trace_id, e
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to parse OpenAI-compatible response",
            )
                .into_response();
        }
    };

    if let (Some(limiter), Some(AdmittedEstimate { raw, calibrated })) =
        (&state.limiter, estimate)
    {
        if let Some(usage) = &openai_response.usage {
            if usage.total_tokens > 0 {
                let actual = usage.total_tokens as f64;
                limiter.reconcile(CorrectionPolicy::Symmetric, calibrated, actual);
                state.calibrator.record(raw, actual);
            }
        }
    }

    match build_client_response(&request.model, &openai_response) {
        Ok(reply) => {
            if let Some(usage) = &openai_response.usage {
                info!(
                    "[{}] Completed | In: {} tokens | Out: {} tokens",
                    trace_id, usage.prompt_tokens, usage.completion_tokens
                );
            }
            json_response(&reply)
        }
        Err(_) => {
            error!(
                "[{}] Upstream returned no choices: {}",
                trace_id,
                String::from_utf8_lossy(&upstream_body)
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OpenAI-compatible upstream returned no choices",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, UpstreamKind};
    use crate::proxy::upstream::UpstreamClient;
    use axum::body::to_bytes;
    use axum::extract::State as AxumState;
    use axum::http::HeaderValue;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Clone, Default)]
    struct MockUpstream {
        requests: Arc<AsyncMutex<Vec<(Option<String>, Value)>>>,
        reply: Arc<AsyncMutex<Value>>,
    }

    async fn completions(
        AxumState(state): AxumState<MockUpstream>,
        headers: HeaderMap,
        body: String,
    ) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        state.requests.lock().await.push((auth, value));
        Json(state.reply.lock().await.clone())
    }

    async fn start_mock(reply: Value) -> (MockUpstream, String, tokio::task::JoinHandle<()>) {
        let mock = MockUpstream {
            requests: Arc::default(),
            reply: Arc::new(AsyncMutex::new(reply)),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(mock.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (
            mock,
            format!("http://{}/v1/chat/completions", addr),
            server,
        )
    }

    fn test_state(endpoint: &str) -> AppState {
        AppState::new(
            RelayConfig {
                upstream: UpstreamKind::OpenAi,
                debug: false,
                proxy: None,
                tpm: None,
                cache_mode: false,
                endpoint: Some(endpoint.to_string()),
                api_key: None,
            },
            UpstreamClient::new_for_test("http://127.0.0.1:1"),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reasoning_round_trip_with_bearer_credential() {
        let (mock, endpoint, server) = start_mock(json!({
            "id": "cmpl-1",
            "choices": [{"message": {
                "role": "assistant",
                "content": "four",
                "reasoning_content": "2+2"
            }, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}
        }))
        .await;
        let state = test_state(&endpoint);

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-test"),
        );
        let body = Bytes::from(
            serde_json::to_vec(&json!({
                "model": "some-reasoner",
                "system": "S",
                "messages": [{"role": "user", "content": "2+2?"}]
            }))
            .unwrap(),
        );
        let response = handle(state, headers, body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let reply: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        server.abort();

        let content = reply["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "thinking");
        assert_eq!(content[0]["thinking"], "2+2");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "four");
        assert_eq!(reply["usage"]["input_tokens"], 7);
        assert_eq!(reply["usage"]["output_tokens"], 2);

        let sent = mock.requests.lock().await;
        assert_eq!(sent[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(sent[0].1["messages"][0]["role"], "system");
        assert_eq!(sent[0].1["messages"][1]["role"], "user");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_credential_fails_before_upstream() {
        let state = test_state("http://127.0.0.1:1/v1/chat/completions");
        let body = Bytes::from_static(b"{\"model\":\"m\",\"messages\":[]}");
        let response = handle(state, HeaderMap::new(), body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_choices_is_a_500() {
        let (_, endpoint, server) = start_mock(json!({"choices": []})).await;
        let state = test_state(&endpoint);

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-test"));
        let body = Bytes::from(
            serde_json::to_vec(&json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .unwrap(),
        );
        let response = handle(state, headers, body).await;
        server.abort();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
