//! Known hosts management for SSH host key verification
//!
//! Reads and appends OpenSSH `known_hosts` entries. Hashed hostnames
//! (`|1|...`) are skipped on load.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::SshError;

/// What to do with a host key the bridge has not seen before
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept every key, never consult or update known_hosts
    AcceptAny,
    /// Trust on first use: accept and record unknown keys, reject changed keys
    #[default]
    AcceptNew,
    /// Only accept keys already present in known_hosts
    Strict,
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept-any" => Ok(Self::AcceptAny),
            "accept-new" => Ok(Self::AcceptNew),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown host key policy '{}'", other)),
        }
    }
}

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host not in known_hosts (first connection)
    Unknown { fingerprint: String },
    /// Key changed from known_hosts entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// File-backed known hosts store shared by all sessions
pub struct KnownHostsStore {
    /// host lookup key -> keys (one per key type)
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Default location: `~/.ssh/known_hosts`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from("known_hosts"))
    }

    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path: path.into(),
        };

        if let Err(e) = store.load() {
            warn!("Failed to load known_hosts from {:?}: {}", store.path, e);
        }

        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<(), SshError> {
        if !self.path.exists() {
            debug!("No known_hosts file at {:?}", self.path);
            return Ok(());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(Self::normalize_hostname(hostname))
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "Loaded {} known host entries ({} unique hosts)",
            entry_count,
            hosts.len()
        );
        Ok(())
    }

    /// `[host]:port` -> `[host]:port`, `host` -> `host`, lowercased.
    /// Port 22 entries written as `[host]:22` collapse to `host`.
    fn normalize_hostname(host: &str) -> String {
        let lower = host.to_lowercase();
        if let Some(rest) = lower.strip_prefix('[') {
            if let Some((name, port)) = rest.split_once("]:") {
                return Self::make_key(name, port.parse().unwrap_or(22));
            }
            return rest.trim_end_matches(']').to_string();
        }
        lower
    }

    /// Lookup key for host:port in known_hosts notation
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint in OpenSSH notation
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    fn fingerprint_from_b64(stored_b64: &str) -> String {
        BASE64
            .decode(stored_b64)
            .map(|bytes| Self::fingerprint_bytes(&bytes))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_key_b64 = BASE64.encode(key.public_key_bytes());
        let actual_key_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == actual_key_type) {
            Some(entry) if entry.key_data == actual_key_b64 => {
                debug!("Host key verified for {} ({})", lookup_key, actual_key_type);
                HostKeyVerification::Verified
            }
            Some(entry) => {
                let expected_fingerprint = Self::fingerprint_from_b64(&entry.key_data);
                warn!(
                    "HOST KEY CHANGED for {} ({})! Expected {}, got {}",
                    lookup_key, actual_key_type, expected_fingerprint, fingerprint
                );
                HostKeyVerification::Changed {
                    expected_fingerprint,
                    actual_fingerprint: fingerprint,
                }
            }
            None => {
                debug!(
                    "Host {} known but no {} key stored, treating as new",
                    lookup_key, actual_key_type
                );
                HostKeyVerification::Unknown { fingerprint }
            }
        }
    }

    /// Record a host key in memory and append it to the file
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);
        let key_b64 = BASE64.encode(key.public_key_bytes());
        let key_type = key.algorithm().as_str().to_string();

        self.hosts
            .write()
            .entry(lookup_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.clone(),
                key_data: key_b64.clone(),
            });

        self.append_to_file(&lookup_key, &key_type, &key_b64)?;

        info!("Added host key for {} ({}) to known_hosts", lookup_key, key_type);
        Ok(())
    }

    fn append_to_file(&self, host: &str, key_type: &str, key_b64: &str) -> Result<(), SshError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{} {} {}", host, key_type, key_b64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY_A: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";
    const KEY_B: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf";

    fn key(openssh: &str) -> PublicKey {
        PublicKey::from_openssh(openssh).unwrap()
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(KnownHostsStore::normalize_hostname("GitHub.com"), "github.com");
        assert_eq!(KnownHostsStore::normalize_hostname("[github.com]:22"), "github.com");
        assert_eq!(
            KnownHostsStore::normalize_hostname("[server.example.com]:2222"),
            "[server.example.com]:2222"
        );
    }

    #[test]
    fn test_make_key() {
        assert_eq!(KnownHostsStore::make_key("github.com", 22), "github.com");
        assert_eq!(KnownHostsStore::make_key("server.com", 2222), "[server.com]:2222");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("strict".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::Strict));
        assert_eq!("Accept-New".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::AcceptNew));
        assert_eq!("accept-any".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::AcceptAny));
        assert!("yolo".parse::<HostKeyPolicy>().is_err());
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::AcceptNew);
    }

    #[test]
    fn test_unknown_then_verified_after_add() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ssh").join("known_hosts");
        let store = KnownHostsStore::open(&path);
        let key_a = key(KEY_A);

        assert!(matches!(
            store.verify("box.local", 2222, &key_a),
            HostKeyVerification::Unknown { .. }
        ));

        store.add_host("box.local", 2222, &key_a).unwrap();
        assert_eq!(store.verify("box.local", 2222, &key_a), HostKeyVerification::Verified);
        // Different port is a different host
        assert!(matches!(
            store.verify("box.local", 22, &key_a),
            HostKeyVerification::Unknown { .. }
        ));

        // Persisted and reloaded
        let reloaded = KnownHostsStore::open(&path);
        assert_eq!(reloaded.verify("box.local", 2222, &key_a), HostKeyVerification::Verified);
    }

    #[test]
    fn test_changed_key_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(
            &path,
            format!("# comment\n\nbox.local,10.0.0.5 {} laptop\n|1|hashed|entry ssh-rsa AAAA\n", KEY_A),
        )
        .unwrap();

        let store = KnownHostsStore::open(&path);
        let key_b = key(KEY_B);

        match store.verify("10.0.0.5", 22, &key_b) {
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                assert_eq!(expected_fingerprint, KnownHostsStore::fingerprint(&key(KEY_A)));
                assert_eq!(actual_fingerprint, KnownHostsStore::fingerprint(&key_b));
            }
            other => panic!("expected changed key, got {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = KnownHostsStore::fingerprint(&key(KEY_A));
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
    }
}
