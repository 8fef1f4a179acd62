pub mod config;
pub mod constants;
pub mod error;
pub mod logger;
pub mod proxy;

use tracing::info;

use crate::config::{RelayConfig, UpstreamKind};
use crate::error::RelayResult;
use crate::proxy::state::AppState;
use crate::proxy::upstream::UpstreamClient;

fn log_startup(config: &RelayConfig) {
    info!("Relay path: {}", config.upstream.label());
    info!(
        "[{}] --debug verbose processing output",
        if config.debug { "x" } else { " " }
    );
    match &config.proxy {
        Some(url) => info!("[x] --proxy {}", url),
        None => info!("[ ] --proxy e.g. --proxy http://127.0.0.1:7890"),
    }
    match config.tpm {
        Some(limit) => info!("[x] --tpm limiting to {:.0} tokens/min", limit),
        None => info!("[ ] --tpm rate limit, e.g. --tpm 0.9M"),
    }
    if config.upstream == UpstreamKind::Gemini {
        info!(
            "[{}] --cache Gemini context caching",
            if config.cache_mode { "x" } else { " " }
        );
    }
    if let Some(endpoint) = &config.endpoint {
        info!("[x] --url {}", endpoint);
    }
}

pub async fn run(config: RelayConfig) -> RelayResult<()> {
    log_startup(&config);
    let upstream = UpstreamClient::new(config.proxy.as_deref())?;
    let state = AppState::new(config, upstream);
    proxy::server::run(state).await
}
