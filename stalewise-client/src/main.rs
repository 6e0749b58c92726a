//! stalewise entry point.

use serde_json::Value;
use stalewise_cache::{FetchOptions, QueryOptions, QuerySnapshot};
use clap::Parser;
use stalewise_client::cli::{Cli, Command};
use stalewise_client::telemetry::init_tracing;
use stalewise_client::{Client, ClientConfig, ClientError};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log)?;

    let client = Client::new(&config)?;
    info!(base_url = %config.api_base_url, "Client ready");

    match cli.command {
        Command::Get { path } => {
            let value = client.fetcher().get_value(&path, FetchOptions::new()).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Health => {
            let health = client
                .services()
                .healthcheck
                .check(FetchOptions::new())
                .await?;
            println!("{} ({})", health.version, health.domain);
        }
        Command::Watch { path } => {
            let result = client.fetcher().query::<Value>(
                &path,
                QueryOptions::new().with_refresh_interval(config.polling_interval()),
            );
            let subscription = result.subscribe(print_snapshot);
            info!(key = %result.key(), "Watching, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            subscription.unsubscribe();
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &QuerySnapshot<Value>) {
    if let Some(err) = &snapshot.error {
        eprintln!("error: {err}");
    }
    if snapshot.loading {
        return;
    }
    match snapshot.data.as_ref().map(serde_json::to_string_pretty) {
        Some(Ok(json)) => println!("{json}"),
        Some(Err(err)) => eprintln!("error: {err}"),
        None => {}
    }
}
