//! compose - command-line entry point for composer.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset. Covers both the library and the
/// binary's own targets.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "composer=info,compose=info"
    } else {
        "composer=warn,compose=warn"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli::is_verbose()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
