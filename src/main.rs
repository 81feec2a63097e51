//! netharness - run network daemon scenarios in a network namespace

use clap::Parser;
use netharness::cli::{self, Args};
use netharness::common::logging;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init_cli(args.verbose);

    let code = cli::run(args).await;
    std::process::exit(code);
}
