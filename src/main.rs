use std::process::ExitCode;

use clap::Parser;
use maskcurator::cli::{self, CliArgs};
use maskcurator::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let settings = args.load_settings();

    // Initialize session log (overwrites previous session log)
    logger::init(args.log_level(&settings));

    cli::run(args, settings)
}
