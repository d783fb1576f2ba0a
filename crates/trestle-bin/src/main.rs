use std::env;

use anyhow::{Context, Result};
use clap::{Arg, Command};

mod runner;
mod trace;

const COMMAND_RUN: &str = "run";
const COMMAND_VERSION: &str = "version";
const COMMAND_EXAMPLE_CONFIG: &str = "generate-example-config";
const ARG_CONFIG: &str = "config";
const ARG_OUTPUT_PATH: &str = "output-path";

async fn run_cli() -> Result<()> {
    let app = Command::new("trestle")
        .about("Cross-chain bridge indexer, prover and auto-claimer.")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            Command::new(COMMAND_RUN)
                .about("Run the bridge service")
                .arg(
                    Arg::new(ARG_CONFIG)
                        .short('c')
                        .num_args(1)
                        .default_value("./config.toml")
                        .help("The config file path"),
                )
                .display_order(0),
        )
        .subcommand(
            Command::new(COMMAND_VERSION)
                .about("Print the version")
                .display_order(1),
        )
        .subcommand(
            Command::new(COMMAND_EXAMPLE_CONFIG)
                .about("Generate an example config file")
                .arg(
                    Arg::new(ARG_OUTPUT_PATH)
                        .short('o')
                        .num_args(1)
                        .default_value("./config.example.toml")
                        .help("The path of the example config file"),
                )
                .display_order(2),
        );

    let matches = app.get_matches();
    match matches.subcommand() {
        Some((COMMAND_RUN, m)) => {
            let config_path: &String = m.get_one(ARG_CONFIG).expect("has default");
            let config = tr_config::load(config_path)?;
            trace::init(&config.log.level)?;
            runner::run(config).await?;
        }
        Some((COMMAND_VERSION, _)) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
        Some((COMMAND_EXAMPLE_CONFIG, m)) => {
            let path: &String = m.get_one(ARG_OUTPUT_PATH).expect("has default");
            std::fs::write(path, tr_config::example()?)
                .with_context(|| format!("write example config to {path}"))?;
        }
        _ => {
            // Default command: run with the default config path.
            let config = tr_config::load("./config.toml")?;
            trace::init(&config.log.level)?;
            runner::run(config).await?;
        }
    }
    Ok(())
}

fn main() {
    let threads = match env::var("TRESTLE_THREADS") {
        Err(_) => num_cpus::get(),
        Ok(v) => v.parse().unwrap_or_else(|_| num_cpus::get()),
    };
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
        .expect("build runtime");

    if let Err(err) = rt.block_on(run_cli()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
