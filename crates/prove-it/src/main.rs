//! Entry point: parse argv, route to the subcommand, exit with its code.

mod cli;
mod dispatch;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Hook { key } => dispatch::run(&key),
        Commands::RunBuiltin { name } => dispatch::run_builtin(&name),
        Commands::Record { name, result } => dispatch::record(&name, result),
        Commands::Signal { name } => dispatch::signal(&name),
        Commands::Prefix => {
            match prove_it_config::prove_it_dir() {
                Some(dir) => println!("{}", dir.display()),
                None => eprintln!("prove_it: could not resolve PROVE_IT_DIR (is $HOME set?)"),
            }
            0
        }
    };
    std::process::exit(code);
}
