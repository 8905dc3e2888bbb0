use anyhow::Result;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;

mod options;
mod simulate;

#[tokio::main]
async fn main() -> Result<()> {
    match init() {
        Command::Simulate(options) => simulate::run(options).await?,
    };

    Ok(())
}

fn init() -> Command {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("courier {}", env!("CARGO_PKG_VERSION"));

    options.command
}
