pub mod context_cache;
pub mod handlers;
pub mod mappers;
pub mod rate_limit;
pub mod server;
pub mod signature_cache;
pub mod state;
pub mod throttle;
pub mod upstream;

pub use signature_cache::SignatureCache;
pub use state::AppState;
