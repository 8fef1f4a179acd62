use std::sync::Arc;

use crate::config::RelayConfig;
use crate::proxy::context_cache::ContextCacheManager;
use crate::proxy::rate_limit::{EstimationCalibrator, TokenBucketLimiter};
use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::throttle::ThrottleGate;
use crate::proxy::upstream::UpstreamClient;

// Axum application state; cheap to clone, everything shared behind Arcs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub upstream: Arc<UpstreamClient>,
    pub limiter: Option<Arc<TokenBucketLimiter>>,
    pub calibrator: Arc<EstimationCalibrator>,
    pub throttle: Arc<ThrottleGate>,
    pub signatures: Arc<SignatureCache>,
    pub context_cache: Arc<ContextCacheManager>,
}

impl AppState {
    pub fn new(config: RelayConfig, upstream: UpstreamClient) -> Self {
        let limiter = config.tpm.map(|tpm| Arc::new(TokenBucketLimiter::new(tpm)));
        Self {
            config: Arc::new(config),
            upstream: Arc::new(upstream),
            limiter,
            calibrator: Arc::new(EstimationCalibrator::new()),
            throttle: Arc::new(ThrottleGate::new()),
            signatures: Arc::new(SignatureCache::new()),
            context_cache: Arc::new(ContextCacheManager::new()),
        }
    }
}
