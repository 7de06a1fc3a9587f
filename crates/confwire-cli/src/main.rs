use anyhow::Result;
use clap::Parser;
use confwire::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use confwire_cli::{
    cli::{Cli, Commands},
    commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over the flags
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(cli.level().into()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Commands::Get { uri, raw } => commands::get::execute(&uri, raw, &mut stdout).await,
        Commands::Watch { uri, raw } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    debug!("Interrupted, stopping watch");
                    on_interrupt.cancel();
                }
            });
            commands::watch::execute(&uri, raw, cancel, &mut stdout).await
        }
    }
}
