//! Convert SAM templates to CloudFormation templates.
//!
//! Known limitation carried over from the original tool: a `CodeUri`
//! pointing at a local directory cannot be transformed; run `package` first.
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cli;
mod exec;
mod policy;
mod template;
mod translator;
mod workflow;

use cli::RootArgs;
use exec::{AwsCli, ExecError};
use translator::InvalidDocument;
use workflow::Pipeline;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_code_for(&err),
    }
}

fn run(args: &RootArgs) -> Result<()> {
    let aws = AwsCli::new();
    Pipeline::new(args, &aws).run()
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(ExecError::Failed { code }) = err.downcast_ref::<ExecError>() {
        // The child already reported the underlying cause on stderr; carry
        // its exit code out without an extra message.
        tracing::debug!(code, "aws command failed");
        return u8::try_from(*code)
            .map(ExitCode::from)
            .unwrap_or(ExitCode::FAILURE);
    }
    if let Some(invalid) = err.downcast_ref::<InvalidDocument>() {
        tracing::error!("{invalid}");
        return ExitCode::FAILURE;
    }
    eprintln!("error: {err:#}");
    ExitCode::FAILURE
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
