use std::{env, io};

use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wallet_ledger::csv::{read_operations, write_accounts};
use wallet_ledger::{LedgerConfig, LedgerEngine};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: wallet-ledger <operations.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let operations = read_operations(path).expect("failed to open csv file");
    let engine = LedgerEngine::with_config(LedgerConfig::from_env());
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(op_receiver)).await;

    write_accounts(io::stdout().lock(), engine.store().accounts())
        .expect("failed to write accounts");
}
