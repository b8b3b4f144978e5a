//! # rema
//!
//! Operator binary for a REMA settlement node. Each invocation restores the
//! ledger snapshot (re-verifying the journal), runs one command, prints the
//! result as JSON on stdout and writes the snapshot back if anything changed.

mod cli;
mod commands;
mod logging;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use cli::{Commands, RemaCli};

fn main() -> Result<()> {
    let cli = RemaCli::parse();
    logging::init_logging("rema=info,rema_ledger=info,rema_settlement=info", cli.log_format);

    let config = commands::load_config(cli.config.as_deref())?;
    let output = if let Commands::Init { force } = cli.command {
        commands::init(config, &cli.state, force)?
    } else {
        let ledger = Arc::new(commands::load_ledger(config, &cli.state)?);
        let output = commands::execute(&ledger, &cli.command)?;
        if cli.command.mutates() {
            commands::save_ledger(&ledger, &cli.state)?;
        }
        output
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
