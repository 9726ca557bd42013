use clap::Parser;
use vantage::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
