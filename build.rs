// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: configuration file path
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("/etc/wheelhouse.conf")
        .help("Configuration file path")
}

fn build_cli() -> Command {
    Command::new("wheelhouse")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mirror a PyPI-compatible package index onto local storage")
        .subcommand_required(true)
        .arg(config_arg())
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(clap::ArgAction::SetTrue)
                .help("Turn on debug logging"),
        )
        .subcommand(
            Command::new("mirror")
                .about("Run a full replication pass against the upstream index")
                .arg(
                    Arg::new("force_check")
                        .long("force-check")
                        .action(clap::ArgAction::SetTrue)
                        .help("Clear the status cursor first, forcing a complete re-diff"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Reconcile on-disk state against authoritative metadata")
                .arg(
                    Arg::new("delete")
                        .long("delete")
                        .action(clap::ArgAction::SetTrue)
                        .help("Remove projects that upstream no longer knows"),
                )
                .arg(
                    Arg::new("json_update")
                        .long("json-update")
                        .action(clap::ArgAction::SetTrue)
                        .help("Also refresh the local JSON metadata"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Report what would change without touching the mirror"),
                ),
        )
        .subcommand(
            Command::new("sync")
                .about("Sync the named project(s) once, without advancing the cursor")
                .arg(Arg::new("projects").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("delete")
                .about("Remove the named project(s) and their files from the mirror")
                .arg(Arg::new("projects").required(true).num_args(1..))
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Show what would be removed without removing it"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("wheelhouse.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
