//! sam - AI shell assistant
//!
//! Runs shell commands directly or lets an AI collaborator propose and
//! execute them inside a sandboxed session.

use sam_shell::cli;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when it parses, otherwise WARN
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for debug)
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
