use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use tenant_authz::authz::parse_policy_lines;
use tenant_authz::config::DEFAULT_BOOTSTRAP_POLICY;
use tenant_authz::sync::offline;

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline tenant policy tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decide one request against tenant definitions loaded from JSON files
    Check {
        /// Project objects, or lists of them (`{"items": [...]}`)
        #[arg(long = "definitions", short = 'd', required = true, num_args = 1..)]
        definitions: Vec<PathBuf>,
        /// Skip the default bootstrap policy
        #[arg(long)]
        no_bootstrap: bool,
        subject: String,
        tenant: String,
        resource: String,
        action: String,
    },
    /// Report definitions that fail to decode or declare foreign tuples
    Lint { files: Vec<PathBuf> },
    /// Print the policy lines the definitions produce
    Dump { files: Vec<PathBuf> },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    if dotenvy::dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            definitions,
            no_bootstrap,
            subject,
            tenant,
            resource,
            action,
        } => {
            let bootstrap = if no_bootstrap {
                Vec::new()
            } else {
                parse_policy_lines(DEFAULT_BOOTSTRAP_POLICY.split(';'))?
            };
            let policy = offline::load(offline::read_objects(&definitions)?, bootstrap).await?;
            for err in &policy.skipped {
                eprintln!("warning: {err}");
            }

            let allowed = policy.store.decide(&subject, &tenant, &resource, &action)?;
            println!("{}", if allowed { "allow" } else { "deny" });
            Ok(if allowed { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }
        Commands::Lint { files } => {
            let problems = offline::lint(&offline::read_objects(&files)?);
            for problem in &problems {
                println!("{problem}");
            }
            println!("{} problem(s)", problems.len());
            Ok(if problems.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Dump { files } => {
            let policy = offline::load(offline::read_objects(&files)?, Vec::new()).await?;
            let snapshot = policy.store.snapshot();
            for rule in &snapshot.rules {
                println!("{rule}");
            }
            for group in &snapshot.groups {
                println!("{group}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
