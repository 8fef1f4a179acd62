// Gemini-path throttle gate. After the upstream reports
// "Resource has been exhausted", requests are spaced at least
// THROTTLE_MIN_SPACING apart for THROTTLE_WINDOW.

use tokio::time::{sleep, Instant};
use tracing::info;

use crate::constants::{THROTTLE_MIN_SPACING, THROTTLE_WINDOW};

#[derive(Default)]
struct ThrottleState {
    until: Option<Instant>,
    last_request: Option<Instant>,
}

#[derive(Default)]
pub struct ThrottleGate {
    state: tokio::sync::Mutex<ThrottleState>,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    // Pre-dispatch check. The mutex is held across the sleep so concurrent
    // requests serialize instead of all proceeding when a window opens.
    pub async fn pace(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if !state.until.is_some_and(|until| now < until) {
            return;
        }

        if let Some(last) = state.last_request {
            let elapsed = now.duration_since(last);
            if elapsed < THROTTLE_MIN_SPACING {
                let wait = THROTTLE_MIN_SPACING - elapsed;
                info!(
                    "Throttle active, delaying request {:.0}s",
                    wait.as_secs_f64()
                );
                sleep(wait).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    // Activation on a Resource Exhausted 429.
    pub async fn engage(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.until = Some(now + THROTTLE_WINDOW);
        state.last_request = Some(now);
        info!(
            "Resource exhausted upstream: limiting to one request per {}s for the next {} minutes",
            THROTTLE_MIN_SPACING.as_secs(),
            THROTTLE_WINDOW.as_secs() / 60
        );
    }

    pub async fn is_active(&self) -> bool {
        let state = self.state.lock().await;
        state.until.is_some_and(|until| Instant::now() < until)
    }
}
