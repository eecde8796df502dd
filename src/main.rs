mod civic;
mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;

use std::process::ExitCode;

fn main() -> ExitCode {
    // `.env` first so its CIVIC_* values take part in config resolution.
    env_loader::load_dotenv();

    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("civic-ingest: {err:#}");
            ExitCode::FAILURE
        }
    }
}
