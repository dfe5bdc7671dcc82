use anyhow::Context;
use clap::Parser;
use eventsub_bot::{
    auth, bot,
    config::{Cli, Command, Settings},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(err) => {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let settings = Settings::try_from(cli.run).context("Invalid configuration")?;
            bot::run(&settings, shutdown_signal()).await?;
        }
        Command::Auth { action, args } => auth::run(action, args).await?,
    }
    Ok(())
}
