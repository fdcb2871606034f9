use clap::Parser;
use gateway_lib::config::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => gateway_lib::app::run(args).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "gateway exited with error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
