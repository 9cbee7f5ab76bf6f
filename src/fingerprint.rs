//! Runtime configuration fingerprinting.
//!
//! The fingerprint is a stable digest over everything that determines what
//! ends up on the head node: the byte contents of every declared file mount
//! plus the runtime-relevant parts of the cluster config. The remote
//! updater stores it as a marker on the head so an unchanged declaration
//! can skip the whole transfer.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::config::ClusterConfig;

/// Stable digest of the declared runtime configuration.
///
/// Two invocations with identical mounted file bytes and relevant config
/// fields produce the same value regardless of mapping iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFingerprint(String);

impl RuntimeFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint for a file-mount set and cluster config.
///
/// Mounts are hashed as (remote path, content digest) pairs ordered by
/// remote path, so the declaration order of the mapping does not matter.
/// Of the config, only fields that affect the remote runtime participate;
/// the cluster's display name does not.
pub fn fingerprint(
    file_mounts: &IndexMap<String, String>,
    config: &ClusterConfig,
) -> Result<RuntimeFingerprint> {
    let mut pairs: Vec<(&str, String)> = Vec::with_capacity(file_mounts.len());
    for (remote, local) in file_mounts {
        let digest = hash_path(Path::new(local))
            .with_context(|| format!("Failed to hash file mount {} -> {}", remote, local))?;
        pairs.push((remote, digest));
    }
    pairs.sort_by_key(|(remote, _)| *remote);

    let mut hasher = Sha256::new();
    for (remote, digest) in &pairs {
        hasher.update(remote.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(config.auth.ssh_user.as_bytes());

    Ok(RuntimeFingerprint(format!("{:x}", hasher.finalize())))
}

/// Hash a file or directory.
///
/// Directories are walked recursively with entries in sorted order; each
/// entry contributes its name and content so renames change the digest.
fn hash_path(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    if metadata.is_dir() {
        let mut hasher = Sha256::new();
        hash_dir_into(&mut hasher, path)?;
        Ok(format!("{:x}", hasher.finalize()))
    } else {
        hash_file(path)
    }
}

fn hash_dir_into(hasher: &mut Sha256, dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        hasher.update(entry.file_name().as_encoded_bytes());
        hasher.update([0u8]);
        if entry.file_type()?.is_dir() {
            hash_dir_into(hasher, &path)?;
        } else {
            hasher.update(hash_file(&path)?.as_bytes());
        }
    }
    Ok(())
}

/// Chunked SHA-256 of one file, as lowercase hex.
fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ManualProviderConfig, ProviderConfig};
    use std::io::Write;
    use tempfile::TempDir;

    fn config(cluster_name: &str, ssh_user: &str) -> ClusterConfig {
        ClusterConfig {
            cluster_name: cluster_name.to_string(),
            provider: ProviderConfig::Manual(ManualProviderConfig {
                head_ip: "10.0.0.1".to_string(),
                worker_ips: Vec::new(),
            }),
            auth: AuthConfig {
                ssh_user: ssh_user.to_string(),
                ssh_private_key: "~/.ssh/id_rsa".into(),
            },
            file_mounts: IndexMap::new(),
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn stable_across_calls() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.txt", b"alpha");
        let mounts = IndexMap::from([("~/a.txt".to_string(), local)]);
        let config = config("dev", "ubuntu");

        let first = fingerprint(&mounts, &config).unwrap();
        let second = fingerprint(&mounts, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn independent_of_declaration_order() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"alpha");
        let b = write_file(&dir, "b.txt", b"beta");
        let config = config("dev", "ubuntu");

        let forward = IndexMap::from([
            ("~/a.txt".to_string(), a.clone()),
            ("~/b.txt".to_string(), b.clone()),
        ]);
        let reversed = IndexMap::from([
            ("~/b.txt".to_string(), b),
            ("~/a.txt".to_string(), a),
        ]);

        assert_eq!(
            fingerprint(&forward, &config).unwrap(),
            fingerprint(&reversed, &config).unwrap()
        );
    }

    #[test]
    fn changes_when_mounted_bytes_change() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.txt", b"alpha");
        let mounts = IndexMap::from([("~/a.txt".to_string(), local.clone())]);
        let config = config("dev", "ubuntu");

        let before = fingerprint(&mounts, &config).unwrap();
        fs::write(&local, b"alpha2").unwrap();
        let after = fingerprint(&mounts, &config).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn cosmetic_cluster_name_does_not_matter() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.txt", b"alpha");
        let mounts = IndexMap::from([("~/a.txt".to_string(), local)]);

        assert_eq!(
            fingerprint(&mounts, &config("dev", "ubuntu")).unwrap(),
            fingerprint(&mounts, &config("prod", "ubuntu")).unwrap()
        );
    }

    #[test]
    fn ssh_user_is_runtime_relevant() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.txt", b"alpha");
        let mounts = IndexMap::from([("~/a.txt".to_string(), local)]);

        assert_ne!(
            fingerprint(&mounts, &config("dev", "ubuntu")).unwrap(),
            fingerprint(&mounts, &config("dev", "ec2-user")).unwrap()
        );
    }

    #[test]
    fn directories_hash_recursively() {
        let dir = TempDir::new().unwrap();
        let subdir = dir.path().join("tree");
        fs::create_dir_all(subdir.join("nested")).unwrap();
        fs::write(subdir.join("x.txt"), b"one").unwrap();
        fs::write(subdir.join("nested").join("y.txt"), b"two").unwrap();

        let mounts = IndexMap::from([(
            "~/tree".to_string(),
            subdir.to_string_lossy().into_owned(),
        )]);
        let config = config("dev", "ubuntu");

        let before = fingerprint(&mounts, &config).unwrap();
        fs::write(subdir.join("nested").join("y.txt"), b"three").unwrap();
        let after = fingerprint(&mounts, &config).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn missing_local_path_is_an_error() {
        let mounts = IndexMap::from([(
            "~/missing".to_string(),
            "/nonexistent/path".to_string(),
        )]);
        let err = fingerprint(&mounts, &config("dev", "ubuntu")).unwrap_err();
        assert!(err.to_string().contains("~/missing"));
    }
}
