mod app;
mod auto_flow;
mod config;
mod error;
mod escalation;
mod gemini;
mod generation;
mod intent;
mod knowledge;
mod policy;
mod prompting;
mod responses;
mod router;
mod session;
mod store;
mod tokens;
mod types;
mod whatsapp;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = app::run().await {
        tracing::error!(error = %err, kind = err.kind(), "barberia bot stopped");
        std::process::exit(1);
    }
}
