//! Remote head-node session: file sync and command execution over SSH.
//!
//! A [`NodeUpdater`] binds one resolved node to live connection parameters
//! and the computed runtime fingerprint. Sessions are transient: every
//! `run_command`/`sync_files` call spawns a fresh `ssh`/`scp` process, which
//! avoids connection pooling complexity while staying compatible with any
//! host the system binaries can reach.
//!
//! # Command Execution
//!
//! Commands are executed as:
//! ```sh
//! ssh [options] user@host "command"
//! ```
//! The command string is passed to the remote shell exactly as given; the
//! caller quotes embedded user-supplied tokens with [`quote`].
//!
//! # File Transfer
//!
//! Uses `scp -r` per mount entry, creating remote parent directories first.
//! Transfers overwrite existing remote content, so a failed sync is always
//! safe to retry wholesale.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use indexmap::IndexMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::fingerprint::RuntimeFingerprint;
use crate::provider::NodeRecord;

/// Marker file on the head node recording the last fully synced
/// fingerprint. An unchanged fingerprint lets `sync_files` skip the
/// transfer entirely.
pub const REMOTE_FINGERPRINT_MARKER: &str = "~/.ray2_runtime_hash";

/// ssh reserves exit status 255 for its own failures (unreachable host,
/// rejected auth); remote commands surface any other status.
const SSH_FAILURE_EXIT: i32 = 255;

/// Errors from remote session operations.
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error("Node {0} has no reachable address")]
    MissingAddress(String),

    #[error("Could not establish SSH session with {host}: {detail}")]
    Connection { host: String, detail: String },

    #[error("Remote command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote command exited with status {code}: {command}")]
    RemoteCommand { command: String, code: i32 },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One or more file mounts failed to transfer.
///
/// Failures are per-entry: mounts transferred before a failure stay in
/// place, the fingerprint marker is left unwritten, and retrying the whole
/// sync is safe.
#[derive(Debug, thiserror::Error)]
#[error("{failed_count} of {total} file mounts failed to sync", failed_count = .failed.len())]
pub struct SyncError {
    /// Total number of mounts attempted.
    pub total: usize,
    /// The entries that failed, in attempt order.
    pub failed: Vec<FailedMount>,
}

/// A single failed mount transfer.
#[derive(Debug)]
pub struct FailedMount {
    pub remote: String,
    pub local: String,
    pub reason: String,
}

/// Captured result of one remote command.
#[derive(Debug)]
pub struct RemoteOutput {
    /// Remote exit status (0 means success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of a [`NodeUpdater::sync_files`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// All mounts transferred; the remote marker now holds the fingerprint.
    Synced { transferred: usize },
    /// The remote marker already matched the fingerprint; nothing sent.
    Unchanged,
}

/// Wrap a token so it survives remote shell re-parsing unchanged.
///
/// Used whenever a user-supplied token is concatenated into a composite
/// command string.
pub fn quote(token: &str) -> String {
    shell_words::quote(token).into_owned()
}

/// Quote a remote path while keeping a leading `~/` eligible for tilde
/// expansion on the remote side.
fn quote_remote_path(path: &str) -> String {
    if path == "~" {
        path.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("~/{}", quote(rest))
    } else {
        quote(path)
    }
}

/// Parent directory of a remote path, if one would need creating.
fn remote_parent(path: &str) -> Option<String> {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => None,
        Some(("~", _)) => None,
        Some((parent, _)) => Some(parent.to_string()),
    }
}

/// A live session against one resolved cluster node.
#[derive(Debug)]
pub struct NodeUpdater {
    node_id: String,
    ssh_ip: String,
    ssh_user: String,
    ssh_private_key: String,
    fingerprint: RuntimeFingerprint,
    timeout: Option<Duration>,
}

impl NodeUpdater {
    /// Bind a resolved node to connection parameters.
    ///
    /// Fails if the provider reported no address for the node.
    pub fn new(
        node: NodeRecord,
        config: &ClusterConfig,
        fingerprint: RuntimeFingerprint,
        timeout: Option<Duration>,
    ) -> Result<Self, UpdaterError> {
        let ssh_ip = node
            .public_ip
            .clone()
            .ok_or_else(|| UpdaterError::MissingAddress(node.id.clone()))?;

        let ssh_private_key =
            shellexpand::tilde(&config.auth.ssh_private_key.to_string_lossy()).into_owned();

        Ok(Self {
            node_id: node.id,
            ssh_ip,
            ssh_user: config.auth.ssh_user.clone(),
            ssh_private_key,
            fingerprint,
            timeout,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ssh_ip(&self) -> &str {
        &self.ssh_ip
    }

    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    pub fn ssh_private_key(&self) -> &str {
        &self.ssh_private_key
    }

    pub fn fingerprint(&self) -> &RuntimeFingerprint {
        &self.fingerprint
    }

    /// The interactive SSH invocation for this node, for the user to run
    /// themselves.
    pub fn login_command(&self) -> String {
        format!(
            "ssh -i {} {}@{}",
            self.ssh_private_key, self.ssh_user, self.ssh_ip
        )
    }

    fn ssh_dest(&self) -> String {
        format!("{}@{}", self.ssh_user, self.ssh_ip)
    }

    /// Options shared by every ssh/scp invocation. Freshly provisioned
    /// hosts are never in known_hosts, so host key checking is off.
    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=30".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-i".to_string(),
            self.ssh_private_key.clone(),
        ]
    }

    /// Full argument vector for one ssh command execution.
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push(self.ssh_dest());
        args.push(command.to_string());
        args
    }

    /// Full argument vector for one scp transfer.
    pub fn scp_args(&self, local: &str, remote: &str) -> Vec<String> {
        let mut args = vec!["-r".to_string()];
        args.extend(self.common_options());
        args.push(local.to_string());
        args.push(format!("{}:{}", self.ssh_dest(), quote_remote_path(remote)));
        args
    }

    /// Execute `command` on the node and wait for it to exit.
    ///
    /// `verbose=true` streams merged stdout/stderr lines as they arrive
    /// (while still capturing them); `verbose=false` captures silently.
    /// A non-zero remote exit status is returned in the output, not as an
    /// error; ssh's own failures and the session timeout are errors.
    pub async fn run_command(
        &self,
        command: &str,
        verbose: bool,
    ) -> Result<RemoteOutput, UpdaterError> {
        debug!("Running on {}: {}", self.ssh_dest(), command);

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(self.ssh_args(command));
        cmd.stdin(Stdio::null());
        // A timed-out future drops the child; make the drop kill the hung
        // remote session's local ssh process.
        cmd.kill_on_drop(true);

        let output = if verbose {
            self.bounded(Self::run_streaming(cmd)).await?
        } else {
            self.bounded(Self::run_captured(cmd)).await?
        };

        if output.exit_code == SSH_FAILURE_EXIT {
            return Err(UpdaterError::Connection {
                host: self.ssh_dest(),
                detail: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Like [`run_command`](Self::run_command) but a non-zero remote exit
    /// status becomes an error.
    pub async fn run_checked(
        &self,
        command: &str,
        verbose: bool,
    ) -> Result<RemoteOutput, UpdaterError> {
        let output = self.run_command(command, verbose).await?;
        if !output.success() {
            return Err(UpdaterError::RemoteCommand {
                command: command.to_string(),
                code: output.exit_code,
            });
        }
        Ok(output)
    }

    /// Synchronize the file mounts onto the node, in declaration order.
    ///
    /// When the remote fingerprint marker already matches this session's
    /// fingerprint and `force` is false, nothing is transferred. Otherwise
    /// every entry is attempted; per-entry failures are collected and
    /// reported together, and the marker is only written after a fully
    /// successful pass.
    pub async fn sync_files(
        &self,
        mounts: &IndexMap<String, String>,
        force: bool,
    ) -> Result<SyncOutcome, UpdaterError> {
        if !force && self.remote_fingerprint_matches().await? {
            info!(
                "Runtime config unchanged on {}; skipping file sync",
                self.ssh_dest()
            );
            return Ok(SyncOutcome::Unchanged);
        }

        let mut failed = Vec::new();
        for (remote, local) in mounts {
            info!("Syncing {} -> {}:{}", local, self.ssh_dest(), remote);
            if let Err(reason) = self.sync_one(local, remote).await {
                warn!("Failed to sync {} -> {}: {}", local, remote, reason);
                failed.push(FailedMount {
                    remote: remote.clone(),
                    local: local.clone(),
                    reason,
                });
            }
        }

        if !failed.is_empty() {
            return Err(SyncError {
                total: mounts.len(),
                failed,
            }
            .into());
        }

        self.write_remote_fingerprint().await?;
        Ok(SyncOutcome::Synced {
            transferred: mounts.len(),
        })
    }

    /// Transfer one mount entry.
    async fn sync_one(&self, local: &str, remote: &str) -> Result<(), String> {
        // scp does not create intermediate directories.
        if let Some(parent) = remote_parent(remote) {
            let mkdir = format!("mkdir -p {}", quote_remote_path(&parent));
            let output = self
                .run_command(&mkdir, false)
                .await
                .map_err(|e| e.to_string())?;
            if !output.success() {
                return Err(format!(
                    "mkdir -p {} exited with {}: {}",
                    parent,
                    output.exit_code,
                    output.stderr.trim()
                ));
            }
        }

        let mut cmd = tokio::process::Command::new("scp");
        cmd.args(self.scp_args(local, remote));
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let output = self
            .bounded(Self::run_captured(cmd))
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "scp exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        Ok(())
    }

    /// Whether the marker on the node holds this session's fingerprint.
    async fn remote_fingerprint_matches(&self) -> Result<bool, UpdaterError> {
        let read = format!("cat {}", REMOTE_FINGERPRINT_MARKER);
        let output = self.run_command(&read, false).await?;
        // A missing marker reads as non-zero; that just means "stale".
        Ok(output.success() && output.stdout.trim() == self.fingerprint.as_str())
    }

    async fn write_remote_fingerprint(&self) -> Result<(), UpdaterError> {
        let write = format!(
            "echo {} > {}",
            self.fingerprint, REMOTE_FINGERPRINT_MARKER
        );
        self.run_checked(&write, false).await?;
        Ok(())
    }

    /// Apply the session timeout, when one was supplied.
    async fn bounded<F>(&self, fut: F) -> Result<RemoteOutput, UpdaterError>
    where
        F: Future<Output = Result<RemoteOutput, UpdaterError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| UpdaterError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn run_captured(
        mut cmd: tokio::process::Command,
    ) -> Result<RemoteOutput, UpdaterError> {
        let output = cmd.output().await?;
        Ok(RemoteOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_streaming(
        mut cmd: tokio::process::Command,
    ) -> Result<RemoteOutput, UpdaterError> {
        enum Line {
            Out(String),
            Err(String),
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stderr"))?;

        let stdout_lines = LinesStream::new(BufReader::new(stdout).lines())
            .map(|line| Line::Out(line.unwrap_or_default()));
        let stderr_lines = LinesStream::new(BufReader::new(stderr).lines())
            .map(|line| Line::Err(line.unwrap_or_default()));
        let mut merged = Box::pin(stream::select(stdout_lines, stderr_lines));

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        while let Some(line) = merged.next().await {
            match line {
                Line::Out(line) => {
                    println!("{}", line);
                    stdout_buf.push_str(&line);
                    stdout_buf.push('\n');
                }
                Line::Err(line) => {
                    eprintln!("{}", line);
                    stderr_buf.push_str(&line);
                    stderr_buf.push('\n');
                }
            }
        }

        let status = child.wait().await?;
        Ok(RemoteOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ManualProviderConfig, ProviderConfig};
    use crate::provider::{NODE_TYPE_HEAD, TAG_NODE_TYPE};
    use std::collections::HashMap;

    fn head_node(ip: Option<&str>) -> NodeRecord {
        NodeRecord {
            id: "head".to_string(),
            tags: HashMap::from([(TAG_NODE_TYPE.to_string(), NODE_TYPE_HEAD.to_string())]),
            public_ip: ip.map(str::to_string),
        }
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            cluster_name: "dev".to_string(),
            provider: ProviderConfig::Manual(ManualProviderConfig {
                head_ip: "10.0.0.1".to_string(),
                worker_ips: Vec::new(),
            }),
            auth: AuthConfig {
                ssh_user: "ubuntu".to_string(),
                ssh_private_key: "/keys/cluster".into(),
            },
            file_mounts: IndexMap::new(),
        }
    }

    fn updater() -> NodeUpdater {
        let fp = crate::fingerprint::fingerprint(&IndexMap::new(), &config()).unwrap();
        NodeUpdater::new(head_node(Some("10.0.0.1")), &config(), fp, None).unwrap()
    }

    #[test]
    fn node_without_address_is_rejected() {
        let fp = crate::fingerprint::fingerprint(&IndexMap::new(), &config()).unwrap();
        let err = NodeUpdater::new(head_node(None), &config(), fp, None).unwrap_err();
        assert!(matches!(err, UpdaterError::MissingAddress(id) if id == "head"));
    }

    #[test]
    fn quoted_token_survives_shell_reparse() {
        let nasty = [
            "plain",
            "two words",
            "it's quoted",
            "a && b; c | d",
            "$HOME `whoami` \"both\" 'kinds'",
            "",
        ];
        for token in nasty {
            let composite = format!("printf %s {}", quote(token));
            let parsed = shell_words::split(&composite).unwrap();
            assert_eq!(parsed, vec!["printf", "%s", token], "token: {:?}", token);
        }
    }

    #[test]
    fn quoted_composite_is_a_single_argument() {
        let inner = "python script.py && ray2 shutdown";
        let wrapped = format!("screen -dm bash -c {}", quote(inner));
        let parsed = shell_words::split(&wrapped).unwrap();
        assert_eq!(parsed, vec!["screen", "-dm", "bash", "-c", inner]);
    }

    #[test]
    fn remote_paths_keep_tilde_expandable() {
        assert_eq!(quote_remote_path("~"), "~");
        assert_eq!(quote_remote_path("~/data"), "~/data");
        assert_eq!(quote_remote_path("~/my dir/f"), "~/'my dir/f'");
        assert_eq!(quote_remote_path("/var/tmp/x"), "/var/tmp/x");
    }

    #[test]
    fn remote_parent_skips_home_and_bare_names() {
        assert_eq!(remote_parent("~/script.py"), None);
        assert_eq!(remote_parent("~/data/input.csv"), Some("~/data".to_string()));
        assert_eq!(remote_parent("script.py"), None);
        assert_eq!(remote_parent("/opt/app/bin"), Some("/opt/app".to_string()));
    }

    #[test]
    fn ssh_args_end_with_dest_and_command() {
        let args = updater().ssh_args("echo hi");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"/keys/cluster".to_string()));
        assert_eq!(args[args.len() - 2], "ubuntu@10.0.0.1");
        assert_eq!(args[args.len() - 1], "echo hi");
    }

    #[test]
    fn scp_args_are_recursive_with_remote_dest_last() {
        let args = updater().scp_args("./app", "~/app");
        assert_eq!(args[0], "-r");
        assert_eq!(args[args.len() - 2], "./app");
        assert_eq!(args[args.len() - 1], "ubuntu@10.0.0.1:~/app");
    }

    #[test]
    fn login_command_format() {
        assert_eq!(
            updater().login_command(),
            "ssh -i /keys/cluster ubuntu@10.0.0.1"
        );
    }
}
