use std::env;
use std::process::ExitCode;

use sportsbook_ledger::csv::{read_transactions, write_balances};
use sportsbook_ledger::{EngineConfig, Sportsbook};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: sportsbook-ledger <ledger.csv>");
        return ExitCode::from(2);
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let rows = match read_transactions(path.clone()) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let book = Sportsbook::with_config(config);
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::spawn(async move {
        for result in rows {
            match result {
                Ok(tx) => {
                    if tx_sender.send(tx).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    if let Err(e) = book.restore(ReceiverStream::new(tx_receiver)).await {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = reader.await {
        error!("ledger reader failed: {e}");
        return ExitCode::FAILURE;
    }

    let accounts = match book.accounts().await {
        Ok(accounts) => accounts,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let overdrawn = accounts.iter().filter(|a| a.is_overdrawn()).count();
    if overdrawn > 0 {
        warn!(overdrawn, "ledger has overdrawn accounts");
    }

    if let Err(e) = write_balances(std::io::stdout().lock(), &accounts) {
        error!("failed to write balances: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
