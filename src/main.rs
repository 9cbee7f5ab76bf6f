//! ray2 CLI - cluster control utility.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use ray2::commands;
use ray2::config::DEFAULT_BOOTSTRAP_CONFIG;
use ray2::updater::UpdaterError;

#[derive(Parser)]
#[command(name = "ray2")]
#[command(about = "Control-plane utility for provisioned compute clusters", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Timeout for individual remote operations, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command on the cluster head
    Execute {
        /// Cluster description YAML
        cluster_yaml: PathBuf,

        /// Command tokens, joined with spaces and run as-is
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },

    /// Install the cluster utilities on the head node
    Setup {
        /// Cluster description YAML
        cluster_yaml: PathBuf,
    },

    /// Print the SSH command for the head node
    Login {
        /// Cluster description YAML
        cluster_yaml: PathBuf,
    },

    /// Upload a script to the head node and run it
    Submit {
        /// Cluster description YAML
        cluster_yaml: PathBuf,

        /// Terminate the cluster when the script completes successfully
        #[arg(long)]
        shutdown: bool,

        /// Detach the script into a screen session and return immediately
        #[arg(long)]
        background: bool,

        /// Script to upload and run
        script: PathBuf,

        /// Arguments passed to the script as-is
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        script_args: Vec<String>,
    },

    /// Synchronize the declared file mounts onto the head node
    Sync {
        /// Cluster description YAML
        cluster_yaml: PathBuf,

        /// Transfer even when the runtime fingerprint is unchanged
        #[arg(long)]
        force: bool,
    },

    /// Terminate every cluster instance (run on the head node)
    Shutdown {
        /// Bootstrap config written during provisioning
        #[arg(long, default_value = DEFAULT_BOOTSTRAP_CONFIG, value_name = "PATH")]
        config: PathBuf,
    },

    /// Validate a cluster description and print a summary
    Validate {
        /// Cluster description YAML
        cluster_yaml: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // login prints a single line for the user (or their shell) to consume;
    // keep resolution chatter away from it.
    let log_level = match (&cli.command, cli.verbose) {
        (Commands::Login { .. }, _) => Level::ERROR,
        (_, true) => Level::DEBUG,
        (_, false) => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", err);
        std::process::exit(1);
    }

    let timeout = cli.timeout.map(Duration::from_secs);

    let result = match cli.command {
        Commands::Execute { cluster_yaml, cmd } => {
            commands::execute(&cluster_yaml, &cmd, timeout).await
        }
        Commands::Setup { cluster_yaml } => commands::setup(&cluster_yaml, timeout).await,
        Commands::Login { cluster_yaml } => commands::login(&cluster_yaml).await,
        Commands::Submit {
            cluster_yaml,
            shutdown,
            background,
            script,
            script_args,
        } => {
            commands::submit(
                &cluster_yaml,
                &script,
                &script_args,
                shutdown,
                background,
                timeout,
            )
            .await
        }
        Commands::Sync {
            cluster_yaml,
            force,
        } => commands::sync(&cluster_yaml, force, timeout).await,
        Commands::Shutdown { config } => commands::shutdown(&config).await,
        Commands::Validate { cluster_yaml } => commands::validate(&cluster_yaml),
    };

    if let Err(err) = result {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

/// A failed remote command propagates its own exit status; everything else
/// exits 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<UpdaterError>() {
        Some(UpdaterError::RemoteCommand { code, .. }) if *code > 0 => *code,
        _ => 1,
    }
}
