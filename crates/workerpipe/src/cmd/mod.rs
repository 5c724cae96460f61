use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod echo;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run as a stdio echo worker.
    Echo(EchoArgs),
    /// Launch a worker, send one request, and print its reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Hold replies until N requests arrived, then answer them newest first.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub batch: u32,
    /// Answer requests of this kind with a session-level protocol error.
    #[arg(long, value_name = "KIND")]
    pub protocol_error_on: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Request kind written to the envelope's `type` field.
    #[arg(long)]
    pub kind: String,
    /// Correlation id of the request.
    #[arg(long)]
    pub id: u32,
    /// JSON object payload.
    #[arg(long, conflicts_with = "file")]
    pub json: Option<String>,
    /// Read the JSON payload from a file.
    #[arg(long, conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Worker program and its arguments.
    #[arg(last = true, required = true, num_args = 1.., value_name = "WORKER")]
    pub worker: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
