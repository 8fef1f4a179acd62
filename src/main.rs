use clap::{Parser, Subcommand};

use trestle::config::{parse_tpm, RelayConfig, UpstreamKind};

#[derive(Parser)]
#[command(name = "trestle", version)]
#[command(about = "Local relay bridging an Anthropic-style chat client to Gemini or any OpenAI-compatible API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay to the Google Gemini generateContent API
    Gemini {
        /// Verbose processing output
        #[arg(long)]
        debug: bool,
        /// Forward proxy for outbound calls (e.g. http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,
        /// Tokens-per-minute budget (e.g. 0.9M or 900,000)
        #[arg(long, value_parser = parse_tpm)]
        tpm: Option<f64>,
        /// Enable Gemini explicit context caching
        #[arg(long)]
        cache: bool,
        /// Fallback API key when the client sends none
        #[arg(long)]
        key: Option<String>,
    },
    /// Relay to an OpenAI-compatible chat completions endpoint
    Openai {
        /// Verbose processing output
        #[arg(long)]
        debug: bool,
        /// Forward proxy for outbound calls (e.g. http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,
        /// Tokens-per-minute budget (e.g. 0.9M or 900,000)
        #[arg(long, value_parser = parse_tpm)]
        tpm: Option<f64>,
        /// Full chat completions endpoint URL
        #[arg(long)]
        url: String,
        /// Fallback API key when the client sends none
        #[arg(long)]
        key: Option<String>,
    },
}

impl Command {
    fn into_config(self) -> RelayConfig {
        match self {
            Command::Gemini {
                debug,
                proxy,
                tpm,
                cache,
                key,
            } => RelayConfig {
                upstream: UpstreamKind::Gemini,
                debug,
                proxy,
                tpm,
                cache_mode: cache,
                endpoint: None,
                api_key: key,
            },
            Command::Openai {
                debug,
                proxy,
                tpm,
                url,
                key,
            } => RelayConfig {
                upstream: UpstreamKind::OpenAi,
                debug,
                proxy,
                tpm,
                cache_mode: false,
                endpoint: Some(url.trim_end_matches('/').to_string()),
                api_key: key,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.command.into_config();
    trestle::logger::init_logger(config.debug);

    if let Err(e) = trestle::run(config).await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
