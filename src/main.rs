use std::process::ExitCode;

use clap::Parser;
use distributed::EnvSnapshot;
use log::error;

use hpc_train::{Args, RunConfig};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match RunConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match hpc_train::run(&config, &EnvSnapshot::capture()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("training failed: {e}");
            ExitCode::FAILURE
        }
    }
}
