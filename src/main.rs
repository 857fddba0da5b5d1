//! pygr CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pygr::core::sandbox::Policy;
use pygr::ops::{OpContext, OpError};
use pygr::paths::Layout;

mod cmd;

#[derive(Parser)]
#[command(name = "pygr")]
#[command(author, version, about = "pygr - build-from-source package manager with rollback")]
pub struct Cli {
    /// Root directory (default: ~/.pygr, or $PYGR_ROOT)
    #[arg(short = 'c', global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Run build commands inside the sandbox (default)
    #[arg(long, global = true, overrides_with = "no_sandbox")]
    sandbox: bool,

    /// Run build commands directly on the host
    #[arg(long, global = true)]
    no_sandbox: bool,

    /// Binary cache base URL
    #[arg(long, global = true, env = "PYGR_CACHE_URL", value_name = "URL")]
    cache: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the code forge for repositories
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short = 'n', long = "limit", default_value_t = 10)]
        limit: usize,
    },
    /// Install packages: NAME[CONSTRAINT] or OWNER/REPO[@REF]
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
        /// Skip the system-PM and recipe routes
        #[arg(long)]
        from_github: bool,
    },
    /// Remove packages and republish the profile
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// List declarative entries
    List,
    /// Print a shell assignment exposing the profile bin directory
    Path,
    /// Reconcile the declarative state with the current profile
    Sync,
    /// Install every declarative entry
    Apply,
    /// Show root, generation, and store summary
    Status,
    /// Snapshot the state file and current generation manifest
    Backup {
        label: Option<String>,
    },
    /// List profile generations
    Generations,
    /// Swap back to the previous generation
    Rollback,
    /// Write the package list to a file (stdout by default)
    Export {
        file: Option<PathBuf>,
    },
    /// Replace the package list from a file
    Import {
        file: PathBuf,
    },
    /// Upgrade packages to their newest satisfying versions
    Upgrade {
        packages: Vec<String>,
    },
    /// Register a recipe repo
    #[command(name = "repo-add")]
    RepoAdd {
        name: String,
        url: String,
    },
    /// List registered recipe repos
    #[command(name = "repo-list")]
    RepoList,
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), OpError> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "pygr", &mut std::io::stdout());
        return Ok(());
    }

    let layout = Layout::resolve(cli.root.as_deref())?;
    let policy = Policy {
        enabled: cli.sandbox || !cli.no_sandbox,
        ..Policy::default()
    };
    let ctx = OpContext::new(layout, policy, cli.cache.clone())?;

    match cli.command {
        Commands::Search { query, limit } => cmd::search::run(&ctx, &query, limit).await,
        Commands::Install {
            packages,
            from_github,
        } => cmd::install::run(&ctx, &packages, from_github).await,
        Commands::Uninstall { packages } => cmd::remove::run(&ctx, &packages),
        Commands::List => cmd::list::run(&ctx),
        Commands::Path => cmd::path::run(&ctx),
        Commands::Sync => cmd::sync::run(&ctx),
        Commands::Apply => cmd::apply::run(&ctx).await,
        Commands::Status => cmd::status::run(&ctx),
        Commands::Backup { label } => cmd::backup::run(&ctx, label.as_deref()),
        Commands::Generations => cmd::generations::run(&ctx),
        Commands::Rollback => cmd::rollback::run(&ctx),
        Commands::Export { file } => cmd::export::run(&ctx, file.as_deref()),
        Commands::Import { file } => cmd::import::run(&ctx, &file),
        Commands::Upgrade { packages } => cmd::upgrade::run(&ctx, &packages).await,
        Commands::RepoAdd { name, url } => cmd::repo::add(&ctx, &name, &url),
        Commands::RepoList => cmd::repo::list(&ctx),
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
