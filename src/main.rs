use std::process::ExitCode;

use clap::Parser;

use gb7edit::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // -- Logging ---------------------------------------------------------
    logger::set_echo(args.verbose);
    logger::init();

    cli::run(args)
}
