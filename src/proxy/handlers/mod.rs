pub mod gemini;
pub mod openai;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::config::UpstreamKind;
use crate::proxy::mappers::generic::GenericRequest;
use crate::proxy::rate_limit::{Admission, EstimationCalibrator, TokenBucketLimiter};
use crate::proxy::state::AppState;

pub async fn handle_relay(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.config.upstream {
        UpstreamKind::Gemini => gemini::handle(state, headers, body).await,
        UpstreamKind::OpenAi => openai::handle(state, headers, body).await,
    }
}

pub(crate) fn new_trace_id() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

// Credential precedence: Authorization bearer token, then x-api-key, then
// the --key fallback.
pub(crate) fn resolve_credential(headers: &HeaderMap, fallback: Option<&str>) -> Option<String> {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    header_value(header::AUTHORIZATION)
        .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string))
        .filter(|key| !key.is_empty())
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
        .or_else(|| fallback.filter(|key| !key.is_empty()).map(str::to_string))
}

pub(crate) fn parse_generic_request(trace_id: &str, body: &Bytes) -> Result<GenericRequest, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error!("[{}] Client body is not valid JSON: {}", trace_id, e);
        (StatusCode::BAD_REQUEST, "Invalid JSON").into_response()
    })
}

pub(crate) struct AdmittedEstimate {
    pub raw: f64,
    pub calibrated: f64,
}

// Admission loop: estimate from payload size, then wait out the bucket until
// the request fits. A request larger than the whole bucket can never pass.
pub(crate) async fn admit(
    limiter: &TokenBucketLimiter,
    calibrator: &EstimationCalibrator,
    payload_bytes: usize,
    trace_id: &str,
) -> Result<AdmittedEstimate, Response> {
    let raw = payload_bytes as f64 / crate::constants::BYTES_PER_TOKEN;
    let calibrated = calibrator.calibrate(raw);

    loop {
        match limiter.consume(calibrated) {
            Admission::Granted => {
                info!(
                    "[{}] TPM admission granted, estimated {:.0} tokens",
                    trace_id, calibrated
                );
                return Ok(AdmittedEstimate { raw, calibrated });
            }
            Admission::Oversized => {
                error!(
                    "[{}] Single request of {:.0} estimated tokens exceeds the TPM capacity",
                    trace_id, calibrated
                );
                return Err((
                    StatusCode::TOO_MANY_REQUESTS,
                    "Request too large for TPM limit",
                )
                    .into_response());
            }
            Admission::Wait(seconds) => {
                info!(
                    "[{}] TPM tokens exhausted, waiting {:.1}s",
                    trace_id, seconds
                );
                sleep(Duration::from_secs_f64(seconds)).await;
            }
        }
    }
}

// Non-200 upstream replies are forwarded verbatim.
pub(crate) fn forward_upstream_error(status: StatusCode, body: Bytes) -> Response {
    (status, body).into_response()
}

pub(crate) fn json_response(value: &Value) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to serialize client response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Serialization failure").into_response()
        }
    }
}
