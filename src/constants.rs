use std::time::Duration;

// Local listening socket. The relay is a single-user tool and binds loopback only.
pub const LISTEN_ADDR: &str = "127.0.0.1:6300";

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// Sentinel accepted by the Gemini backend as "skip thought-signature validation"
// when a functionCall is replayed without its original signature.
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);
pub const CACHE_DELETE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

// Server-side TTL requested for cachedContents handles, and the client-side
// expiry we track for them. The client expiry is deliberately shorter so we
// never reference a handle the server may already have reaped.
pub const CACHE_SERVER_TTL: &str = "1800s";
pub const CACHE_CLIENT_EXPIRY: Duration = Duration::from_secs(25 * 60);

// After a "Resource has been exhausted" 429: at most one request per
// THROTTLE_MIN_SPACING until THROTTLE_WINDOW has elapsed.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const THROTTLE_MIN_SPACING: Duration = Duration::from_secs(61);
pub const THROTTLE_BACKPRESSURE: Duration = Duration::from_secs(61);

// Rough payload-bytes-to-tokens divisor used before calibration.
pub const BYTES_PER_TOKEN: f64 = 3.0;

// Gemini-path pacing applied between bucket admission and dispatch.
pub const POST_ADMISSION_PACING: Duration = Duration::from_secs(1);
pub const MAX_OUTPUT_TOKENS_CLAMP: u32 = 4000;
