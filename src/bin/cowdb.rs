//! # cowdb CLI Entry Point
//!
//! ```bash
//! # Open (or create) a repository and start the REPL
//! cowdb ./myrepo
//!
//! # Show version / help
//! cowdb --version
//! cowdb --help
//! ```

use std::env;
use std::path::PathBuf;

use cowdb::cli::Repl;
use eyre::{bail, Result, WrapErr};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut repo_path: Option<PathBuf> = None;
    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("cowdb {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            flag if flag.starts_with('-') => {
                bail!("Unknown option: {}", flag);
            }
            path => {
                if repo_path.is_some() {
                    bail!("Multiple repository paths specified");
                }
                repo_path = Some(PathBuf::from(path));
            }
        }
    }

    let Some(repo_path) = repo_path else {
        print_usage();
        return Ok(());
    };

    let mut repl = Repl::new(&repo_path)
        .wrap_err_with(|| format!("failed to open repository at {:?}", repo_path))?;
    repl.run()
}

fn print_usage() {
    println!("cowdb - embedded copy-on-write B-tree store");
    println!();
    println!("USAGE:");
    println!("    cowdb [OPTIONS] <REPOSITORY_PATH>");
    println!();
    println!("ARGS:");
    println!("    <REPOSITORY_PATH>    Path to the repository directory");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print help information");
    println!("    -v, --version        Print version information");
}
