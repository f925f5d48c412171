// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

use std::fs;
use std::io;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use playstats::config::Config;
use playstats::error;
use playstats::pipeline;
use playstats::prim::Mode;

#[derive(Parser, Debug)]
#[command(name = "playstats")]
#[command(about = "Incremental per-user top-K listening statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug messages, overrides RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge new listens into the snapshot and write the top-K artifact.
    Run {
        #[arg(value_name = "CONFIG_FILE")]
        config: PathBuf,

        /// Emit the top-K of every user, regardless of the config.
        #[arg(long)]
        full: bool,
    },

    /// Validate the config file and print the effective configuration.
    Config {
        #[arg(value_name = "CONFIG_FILE")]
        config: PathBuf,
    },
}

fn load_config(config_fname: &Path) -> error::Result<Config> {
    let f = fs::File::open(config_fname)?;
    let buf_reader = io::BufReader::new(f);
    let lines: io::Result<Vec<String>> = buf_reader.lines().collect();
    Config::parse(lines?.iter())
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut logger = env_logger::Builder::new();
    logger.filter_level(log_level);
    if !cli.verbose {
        logger.parse_default_env();
    }
    logger.init();

    let result = match cli.command {
        Command::Config { config } => load_config(&config).map(|config| {
            println!("Configuration:\n{}", config);
        }),
        Command::Run { config, full } => load_config(&config).and_then(|mut config| {
            if full {
                config.mode = Mode::Full;
            }
            println!("Configuration:\n{}\n", config);
            let stats = pipeline::run_job(&config)?;
            println!(
                "Read {} listens, dropped {}, emitted top {} for {} users.",
                stats.listens_read,
                stats.listens_dropped,
                config.k,
                stats.users_emitted,
            );
            Ok(())
        }),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}
