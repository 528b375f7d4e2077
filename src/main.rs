use std::process::ExitCode;

use clap::Parser;
use transactional_core::cli::{self, Cli};
use transactional_core::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = get_subscriber("transactional_core".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    cli::run(Cli::parse()).await
}
