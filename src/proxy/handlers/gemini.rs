// Gemini relay path: translate → context cache → throttle → TPM admission →
// generateContent → post-hoc correction → Anthropic-style reply.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::{
    admit, forward_upstream_error, json_response, new_trace_id, parse_generic_request,
    resolve_credential, AdmittedEstimate,
};
use crate::constants::{
    MAX_OUTPUT_TOKENS_CLAMP, POST_ADMISSION_PACING, THROTTLE_BACKPRESSURE,
};
use crate::proxy::mappers::gemini::{
    build_client_response, build_google_request, GenerationConfig, GoogleResponse,
};
use crate::proxy::rate_limit::CorrectionPolicy;
use crate::proxy::state::AppState;

const RESOURCE_EXHAUSTED_MARKER: &str = "Resource has been exhausted";

pub async fn handle(state: AppState, headers: HeaderMap, body: Bytes) -> Response {
    let trace_id = new_trace_id();

    let Some(api_key) = resolve_credential(&headers, state.config.api_key.as_deref()) else {
        error!("[{}] No API key in headers and no --key fallback", trace_id);
        return (StatusCode::UNAUTHORIZED, "Missing API Key").into_response();
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

    let mut google_request = build_google_request(&request, &state.signatures);

    if state.config.cache_mode {
        state
            .context_cache
            .apply(
                &state.upstream,
                &api_key,
                &request.model,
                request.system.as_deref().unwrap_or_default(),
                &mut google_request,
            )
            .await;
    }

    state.throttle.pace().await;

    let mut estimate: Option<AdmittedEstimate> = None;
    if let Some(limiter) = &state.limiter {
        match admit(limiter, &state.calibrator, body.len(), &trace_id).await {
            Ok(admitted) => estimate = Some(admitted),
            Err(response) => return response,
        }
        // Pace bursty clients and cap the response so one turn cannot blow
        // the minute budget.
        sleep(POST_ADMISSION_PACING).await;
        google_request.generation_config = Some(GenerationConfig {
            max_output_tokens: Some(MAX_OUTPUT_TOKENS_CLAMP),
        });
    }

    let (status, upstream_body) = match state
        .upstream
        .generate_content(&api_key, &request.model, &google_request)
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
            "[{}] Gemini returned {}: {}",
            trace_id,
            status,
            String::from_utf8_lossy(&upstream_body)
        );
        if status == StatusCode::TOO_MANY_REQUESTS {
            if String::from_utf8_lossy(&upstream_body).contains(RESOURCE_EXHAUSTED_MARKER) {
                state.throttle.engage().await;
            }
            if state.limiter.is_some() {
                // Back-pressure: make the 429 itself slow the caller down.
                sleep(THROTTLE_BACKPRESSURE).await;
            }
        }
        return forward_upstream_error(status, upstream_body);
    }

    let google_response: GoogleResponse = match serde_json::from_slice(&upstream_body) {
        Ok(response) => response,
        Err(e) => {
            error!("[{}] Failed to parse Gemini response: {}", trace_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to parse Gemini response",
            )
                .into_response();
        }
    };

    if let (Some(limiter), Some(AdmittedEstimate { raw, calibrated })) =
        (&state.limiter, estimate)
    {
        if let Some(usage) = &google_response.usage_metadata {
            if usage.total_token_count > 0 {
                let actual = usage.total_token_count as f64;
                // Conservative policy: over-estimates stay deducted as a
                // safety margin against the provider's own accounting.
                limiter.reconcile(CorrectionPolicy::Conservative, calibrated, actual);
                state.calibrator.record(raw, actual);
            }
        }
    }

    match build_client_response(&request.model, &google_response, &state.signatures) {
        Ok(reply) => {
            if let Some(usage) = &google_response.usage_metadata {
                info!(
                    "[{}] Completed | In: {} tokens | Out: {} tokens",
                    trace_id, usage.prompt_token_count, usage.candidates_token_count
                );
            }
            json_response(&reply)
        }
        Err(_) => {
            error!(
                "[{}] Gemini returned no candidates: {}",
                trace_id,
                String::from_utf8_lossy(&upstream_body)
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Gemini returned no candidates",
            )
                .into_response()
        }
    }
}
