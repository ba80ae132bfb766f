mod cli;
mod clipboard;
mod cmd;
mod config;
mod error;
mod git;
mod instance;
mod logger;
mod multiplexer;
mod storage;
mod supervisor;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "agentyard start");

    match cli::run() {
        Ok(result) => {
            info!("agentyard finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "agentyard failed");
            Err(err)
        }
    }
}
