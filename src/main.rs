#![allow(clippy::too_many_arguments)]

use clap::Parser;
use shotmark::{cli, logger};

fn main() -> std::process::ExitCode {
    let args = cli::CliArgs::parse();

    // Session log (overwrites previous session log); --verbose mirrors to stderr
    logger::init(args.verbose);

    cli::run(args)
}
