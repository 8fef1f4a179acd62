// Runtime configuration assembled from the CLI in main.rs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Gemini,
    OpenAi,
}

impl UpstreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamKind::Gemini => "Gemini",
            UpstreamKind::OpenAi => "OpenAI-compatible",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream: UpstreamKind,
    pub debug: bool,
    pub proxy: Option<String>,
    // Tokens-per-minute budget; None disables the bucket.
    pub tpm: Option<f64>,
    // Gemini explicit context caching.
    pub cache_mode: bool,
    // Chat Completions endpoint, required on the OpenAI path.
    pub endpoint: Option<String>,
    // Fallback credential when the client sends none.
    pub api_key: Option<String>,
}

// Parses a TPM flag value. Whitespace and comma separators are ignored and a
// trailing `M`/`m` scales by one million, so "0.9M", "900,000", "5000,000"
// and "2000000" are all accepted.
pub fn parse_tpm(spec: &str) -> Result<f64, String> {
    let cleaned = spec.trim().replace(',', "");

    let parsed = if let Some(number) = cleaned
        .strip_suffix('M')
        .or_else(|| cleaned.strip_suffix('m'))
    {
        number.parse::<f64>().map(|v| v * 1_000_000.0)
    } else {
        cleaned.parse::<f64>()
    };

    match parsed {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(format!("invalid TPM value: {}", spec)),
    }
}
