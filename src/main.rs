use clap::Parser;
use rotatrader::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
