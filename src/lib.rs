pub mod catalog;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod copy;
pub mod engine;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod memory;
pub mod redact;
pub mod rowset;
pub mod scratch;
pub mod store;
pub mod types;
pub mod yaml_provider;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("colcopy", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Copy(args) => copy::execute(&args),
        Commands::Match(args) => copy::execute_match(&args),
    }
}
