//! User-facing cluster workflows.
//!
//! Each workflow loads the cluster config, resolves the head node through
//! the configured provider, binds a [`NodeUpdater`] session, and drives a
//! short sequence of sync/execute operations. Workflows hold no state
//! across invocations.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::{self, ClusterConfig};
use crate::fingerprint;
use crate::head;
use crate::provider::{
    self, NODE_TYPE_HEAD, NODE_TYPE_WORKER, NodeProvider, ProviderError, node_type_filter,
};
use crate::updater::{NodeUpdater, SyncOutcome, quote};

/// Repository cloned onto the head node by `setup`. Installing it puts the
/// `ray2` entry point on the head's PATH, which submitted scripts rely on
/// for `--shutdown`.
const HEAD_SETUP_REPO: &str = "https://github.com/richardliaw/rayutils.git";

/// Resolve the head node and bind a session to it.
///
/// `mounts` is the mapping the session will synchronize; its fingerprint
/// becomes the session fingerprint.
async fn head_updater(
    config: &ClusterConfig,
    mounts: &IndexMap<String, String>,
    timeout: Option<Duration>,
) -> Result<NodeUpdater> {
    let provider = provider::for_config(config);
    debug!("Using provider: {}", provider.name());

    let head = head::resolve_head(provider.as_ref(), &config.cluster_name).await?;
    info!(
        "Using head node {} of cluster ({})",
        head.id, config.cluster_name
    );

    let fingerprint = fingerprint::fingerprint(mounts, config)?;
    Ok(NodeUpdater::new(head, config, fingerprint, timeout)?)
}

/// Execute a command on the cluster head.
///
/// Tokens are joined with single spaces and passed through as-is; quoting
/// embedded arguments is the caller's responsibility.
pub async fn execute(
    cluster_yaml: &Path,
    cmd: &[String],
    timeout: Option<Duration>,
) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;
    let updater = head_updater(&config, &config.file_mounts, timeout).await?;

    updater.run_checked(&cmd.join(" "), true).await?;
    Ok(())
}

/// Install the cluster utilities on the head node.
///
/// Needed once per cluster so that `submit --shutdown` can invoke
/// `ray2 shutdown` remotely.
pub async fn setup(cluster_yaml: &Path, timeout: Option<Duration>) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;
    let updater = head_updater(&config, &config.file_mounts, timeout).await?;

    let clone = format!("git clone {}", HEAD_SETUP_REPO);
    updater
        .run_checked(&clone, true)
        .await
        .context("Cloning the utilities repository on the head node failed")?;
    updater
        .run_checked("cd rayutils && pip install -e .", true)
        .await
        .context("Installing the utilities on the head node failed")?;
    Ok(())
}

/// Print the SSH invocation for the head node.
///
/// Resolution happens with status output suppressed (the caller raises the
/// log level) so stdout carries nothing but the command itself. No session
/// is opened here.
pub async fn login(cluster_yaml: &Path) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;
    let updater = head_updater(&config, &config.file_mounts, None).await?;

    println!("{}", updater.login_command());
    Ok(())
}

/// Upload a script to the head node and launch it.
pub async fn submit(
    cluster_yaml: &Path,
    script: &Path,
    script_args: &[String],
    shutdown: bool,
    background: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;

    let script_name = script
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Script path has no file name: {}", script.display()))?;

    // The script lands in the remote home directory; the session
    // fingerprint covers exactly this one-entry mapping, so resubmitting
    // an unchanged script skips the upload.
    let mounts = IndexMap::from([(
        format!("~/{}", script_name),
        script.to_string_lossy().into_owned(),
    )]);

    let updater = head_updater(&config, &mounts, timeout).await?;
    updater.sync_files(&mounts, false).await?;

    let command = build_submit_command(&script_name, script_args, shutdown, background);
    updater.run_checked(&command, true).await?;
    Ok(())
}

/// Build the remote command line for a submitted script.
///
/// `shutdown` appends the cluster teardown to run after the script
/// succeeds; `background` detaches the whole thing into a `screen`
/// session, with the composed command quoted as a single argument.
pub fn build_submit_command(
    script_name: &str,
    args: &[String],
    shutdown: bool,
    background: bool,
) -> String {
    let mut command = format!("python {}", script_name);
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }

    if shutdown {
        command.push_str(" && ray2 shutdown");
    }

    if background {
        command = format!("screen -dm bash -c {}", quote(&command));
    }

    command
}

/// Synchronize the declared file mounts onto the head node.
pub async fn sync(cluster_yaml: &Path, force: bool, timeout: Option<Duration>) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;
    let updater = head_updater(&config, &config.file_mounts, timeout).await?;

    match updater.sync_files(&config.file_mounts, force).await? {
        SyncOutcome::Synced { transferred } => {
            info!("Synced {} file mounts to the head node", transferred);
        }
        SyncOutcome::Unchanged => {}
    }
    Ok(())
}

/// Tear down the whole cluster. Run on the head node.
///
/// Provider identity is recovered from the bootstrap config written during
/// provisioning; the path is a parameter so callers are not coupled to the
/// default location.
pub async fn shutdown(bootstrap_config: &Path) -> Result<()> {
    // Stop the local cluster service first. A service that is already
    // gone must not block teardown.
    match tokio::process::Command::new("ray")
        .arg("stop")
        .status()
        .await
    {
        Ok(status) if !status.success() => warn!("ray stop exited with {}", status),
        Err(err) => warn!("Could not run ray stop: {}", err),
        Ok(_) => {}
    }

    let config = config::load_config(bootstrap_config)?;
    let provider = provider::for_config(&config);

    teardown_cluster(provider.as_ref()).await?;
    println!("good bye!");
    Ok(())
}

/// Request termination of every cluster instance, workers before the head.
///
/// The head goes last so it can coordinate until the rest of the cluster
/// is gone. Per-node failures are logged and iteration continues; one
/// stuck instance must not block teardown of the others.
pub async fn teardown_cluster(provider: &dyn NodeProvider) -> Result<(), ProviderError> {
    info!("Terminating worker instances...");
    for node in provider
        .list_nodes(&node_type_filter(NODE_TYPE_WORKER))
        .await?
    {
        if let Err(err) = provider.terminate_node(&node.id).await {
            warn!("Failed to terminate worker {}: {}", node.id, err);
        }
    }

    info!("Terminating head instance...");
    for node in provider
        .list_nodes(&node_type_filter(NODE_TYPE_HEAD))
        .await?
    {
        if let Err(err) = provider.terminate_node(&node.id).await {
            warn!("Failed to terminate head {}: {}", node.id, err);
        }
    }

    Ok(())
}

/// Load a cluster config and print a summary of what it declares.
pub fn validate(cluster_yaml: &Path) -> Result<()> {
    let config = config::load_config(cluster_yaml)?;

    println!("Configuration is valid!");
    println!();
    println!("  Cluster:     {}", config.cluster_name);
    println!("  Provider:    {}", provider::for_config(&config).name());
    println!("  SSH user:    {}", config.auth.ssh_user);
    println!("  File mounts: {}", config.file_mounts.len());
    Ok(())
}
