// TPM smoothing: a process-global token bucket admitting requests against an
// estimated cost, reconciled afterwards against the upstream's reported
// usage, plus the adaptive bytes-to-tokens calibrator feeding the estimates.

use std::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Granted,
    // Seconds until enough credit will have accrued.
    Wait(f64),
    // The request alone exceeds bucket capacity and can never be admitted.
    Oversized,
}

// How post-hoc correction treats over-estimates. Under-estimates are always
// deducted; the conservative variant keeps over-estimates as a safety margin
// while the symmetric variant refunds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionPolicy {
    Conservative,
    Symmetric,
}

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

pub struct TokenBucketLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucketLimiter {
    pub fn new(tpm_limit: f64) -> Self {
        Self {
            capacity: tpm_limit,
            refill_rate: tpm_limit / 60.0,
            state: Mutex::new(BucketState {
                tokens: tpm_limit,
                last_update: Instant::now(),
            }),
        }
    }

    // Never sleeps; the admission loop in the handler sleeps between tries
    // so the lock is held only for the arithmetic.
    pub fn consume(&self, amount: f64) -> Admission {
        if amount > self.capacity {
            return Admission::Oversized;
        }

        let mut state = self.state.lock().expect("token bucket lock");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_update = now;

        if state.tokens >= amount {
            state.tokens -= amount;
            return Admission::Granted;
        }

        Admission::Wait((amount - state.tokens) / self.refill_rate)
    }

    pub fn refund(&self, amount: f64) {
        let mut state = self.state.lock().expect("token bucket lock");
        state.tokens = (state.tokens + amount).min(self.capacity);
    }

    // No floor: the balance may go negative so the next request waits out
    // the deficit.
    pub fn consume_extra(&self, amount: f64) {
        let mut state = self.state.lock().expect("token bucket lock");
        state.tokens -= amount;
    }

    pub fn reconcile(&self, policy: CorrectionPolicy, estimated: f64, actual: f64) {
        if actual > estimated {
            debug!(
                "TPM correction: estimated {:.0}, actual {:.0}, deducting {:.0} extra",
                estimated,
                actual,
                actual - estimated
            );
            self.consume_extra(actual - estimated);
        } else if policy == CorrectionPolicy::Symmetric && estimated > actual {
            debug!(
                "TPM correction: estimated {:.0}, actual {:.0}, refunding {:.0}",
                estimated,
                actual,
                estimated - actual
            );
            self.refund(estimated - actual);
        }
    }

    #[cfg(test)]
    fn balance(&self) -> f64 {
        self.state.lock().expect("token bucket lock").tokens
    }
}

// Learns the payload-bytes-to-tokens ratio from upstream usage metadata.
// estimated = raw_estimate * ratio; the ratio tracks actual/raw with an
// exponential moving average.
pub struct EstimationCalibrator {
    ratio: Mutex<f64>,
}

impl EstimationCalibrator {
    pub fn new() -> Self {
        Self {
            ratio: Mutex::new(1.0),
        }
    }

    pub fn calibrate(&self, raw_estimate: f64) -> f64 {
        raw_estimate * *self.ratio.lock().expect("calibrator lock")
    }

    pub fn record(&self, raw_estimate: f64, actual: f64) {
        if raw_estimate <= 0.0 {
            return;
        }
        let mut ratio = self.ratio.lock().expect("calibrator lock");
        *ratio = 0.8 * *ratio + 0.2 * (actual / raw_estimate);
        debug!("Adaptive estimation ratio updated: {:.4}", *ratio);
    }

    pub fn ratio(&self) -> f64 {
        *self.ratio.lock().expect("calibrator lock")
    }
}

impl Default for EstimationCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn consume_within_capacity_is_granted() {
        let limiter = TokenBucketLimiter::new(600.0);
        assert_eq!(limiter.consume(100.0), Admission::Granted);
        assert!((limiter.balance() - 500.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_requests_are_rejected_outright() {
        let limiter = TokenBucketLimiter::new(100.0);
        assert_eq!(limiter.consume(101.0), Admission::Oversized);
    }

    #[tokio::test(start_paused = true)]
    async fn depleted_bucket_reports_wait_matching_refill_rate() {
        // 600/min refills at 10 tokens a second.
        let limiter = TokenBucketLimiter::new(600.0);
        assert_eq!(limiter.consume(600.0), Admission::Granted);

        match limiter.consume(100.0) {
            Admission::Wait(seconds) => assert!((seconds - 10.0).abs() < 1e-6),
            other => panic!("expected wait, got {:?}", other),
        }

        advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.consume(100.0), Admission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_saturates_at_capacity() {
        let limiter = TokenBucketLimiter::new(600.0);
        assert_eq!(limiter.consume(10.0), Admission::Granted);
        advance(Duration::from_secs(3600)).await;
        assert_eq!(limiter.consume(0.0), Admission::Granted);
        assert!(limiter.balance() <= 600.0 + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn refund_never_exceeds_capacity() {
        let limiter = TokenBucketLimiter::new(600.0);
        limiter.refund(1_000.0);
        assert!(limiter.balance() <= 600.0 + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_extra_allows_deficit() {
        let limiter = TokenBucketLimiter::new(600.0);
        assert_eq!(limiter.consume(600.0), Admission::Granted);
        limiter.consume_extra(200.0);
        assert!(limiter.balance() < 0.0);

        // The deficit extends the wait beyond a full bucket's worth.
        match limiter.consume(600.0) {
            Admission::Wait(seconds) => assert!(seconds > 60.0),
            other => panic!("expected wait, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn symmetric_correction_nets_to_actual_usage() {
        let limiter = TokenBucketLimiter::new(10_000.0);

        // Over-estimate: refund brings net deduction to actual.
        assert_eq!(limiter.consume(3_000.0), Admission::Granted);
        limiter.reconcile(CorrectionPolicy::Symmetric, 3_000.0, 1_000.0);
        assert!((limiter.balance() - 9_000.0).abs() < 1e-6);

        // Under-estimate: extra deduction brings net deduction to actual.
        assert_eq!(limiter.consume(500.0), Admission::Granted);
        limiter.reconcile(CorrectionPolicy::Symmetric, 500.0, 2_000.0);
        assert!((limiter.balance() - 7_000.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn conservative_correction_keeps_over_estimates() {
        let limiter = TokenBucketLimiter::new(10_000.0);
        assert_eq!(limiter.consume(3_000.0), Admission::Granted);
        limiter.reconcile(CorrectionPolicy::Conservative, 3_000.0, 1_000.0);
        // No refund: the margin stays deducted.
        assert!((limiter.balance() - 7_000.0).abs() < 1e-6);

        assert_eq!(limiter.consume(500.0), Admission::Granted);
        limiter.reconcile(CorrectionPolicy::Conservative, 500.0, 2_000.0);
        assert!((limiter.balance() - 5_000.0).abs() < 1e-6);
    }

    #[test]
    fn calibrator_moves_toward_observed_ratio() {
        let calibrator = EstimationCalibrator::new();
        assert!((calibrator.ratio() - 1.0).abs() < 1e-9);
        assert!((calibrator.calibrate(300.0) - 300.0).abs() < 1e-9);

        calibrator.record(100.0, 200.0);
        assert!((calibrator.ratio() - 1.2).abs() < 1e-9);

        for _ in 0..50 {
            calibrator.record(100.0, 200.0);
        }
        assert!((calibrator.ratio() - 2.0).abs() < 0.01);
    }

    #[test]
    fn calibrator_ignores_zero_estimates() {
        let calibrator = EstimationCalibrator::new();
        calibrator.record(0.0, 500.0);
        assert!((calibrator.ratio() - 1.0).abs() < 1e-9);
    }
}
