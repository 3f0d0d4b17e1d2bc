use clap::Parser;
use tracing::error;

use irsactl::cli::Cli;

#[tokio::main]
async fn main() {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Logs go to stderr; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "irsactl=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.run().await {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}
