//! Persisted local credential store.
//!
//! The store is a directory (default `~/.tsh`) holding one file per
//! credential, `<name>.key`: an OpenSSH private key, optionally followed by
//! the OpenSSH certificate issued for it.
//!
//! Credentials whose certificate has expired, or whose certificate was issued
//! for a different key, are skipped on load. Saving stages the whole file
//! under a hidden temporary name and renames it into place, so the key and its
//! certificate are replaced together or not at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::ssh_key::LineEnding;
use russh::keys::{Certificate, PrivateKey};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::tsh::error::TshError;

const KEY_EXTENSION: &str = "key";
const PRIVATE_KEY_END: &str = "-----END OPENSSH PRIVATE KEY-----";

/// A credential loaded from the store.
pub struct StoredKey {
    pub name: String,
    pub key: Arc<PrivateKey>,
    pub certificate: Option<Certificate>,
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("name", &self.name)
            .field("algorithm", &self.key.algorithm())
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

/// Handle to the local credential directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalKeyStore {
    dir: PathBuf,
}

impl LocalKeyStore {
    /// Open the store at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, TshError> {
        let dir = dir.into();

        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(store_error(&dir, "path exists and is not a directory"));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| store_error(&dir, e))?;
                restrict_permissions(&dir, 0o700).await?;
                debug!("Created local credential store at {}", dir.display());
            }
            Err(e) => return Err(store_error(&dir, e)),
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every usable credential, sorted by name.
    ///
    /// Unreadable keys are skipped with a warning; a credential whose
    /// certificate expired before `now` is skipped entirely.
    pub async fn load(&self) -> Result<Vec<StoredKey>, TshError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            match self.load_one(&name, now).await {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => {}
                Err(reason) => warn!("Skipping stored credential '{}': {}", name, reason),
            }
        }

        Ok(keys)
    }

    async fn load_one(&self, name: &str, now: u64) -> Result<Option<StoredKey>, String> {
        let path = self.key_path(name);
        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

        let (pem, cert_text) = split_credential(&text);
        let key = russh::keys::decode_secret_key(pem, None)
            .map_err(|e| format!("failed to decode key in {}: {}", path.display(), e))?;

        let certificate = match cert_text {
            Some(cert_text) => {
                let cert = Certificate::from_openssh(cert_text).map_err(|e| {
                    format!("failed to decode certificate in {}: {}", path.display(), e)
                })?;
                if cert.public_key() != key.public_key().key_data() {
                    return Err(format!(
                        "certificate in {} was issued for a different key",
                        path.display()
                    ));
                }
                if cert.valid_before() <= now {
                    debug!("Certificate for '{}' has expired, skipping", name);
                    return Ok(None);
                }
                Some(cert)
            }
            None => None,
        };

        Ok(Some(StoredKey {
            name: name.to_string(),
            key: Arc::new(key),
            certificate,
        }))
    }

    /// Persist a key and its certificate under `name`, replacing any
    /// previous credential with that name.
    pub async fn save(
        &self,
        name: &str,
        key: &PrivateKey,
        certificate: &Certificate,
    ) -> Result<(), TshError> {
        validate_name(name).map_err(|reason| store_error(&self.dir, reason))?;

        let key_text = key
            .to_openssh(LineEnding::LF)
            .map_err(|e| store_error(&self.dir, format!("failed to encode key: {}", e)))?;
        let cert_text = certificate
            .to_openssh()
            .map_err(|e| store_error(&self.dir, format!("failed to encode certificate: {}", e)))?;

        let contents = Zeroizing::new(format!("{}{}\n", key_text.as_str(), cert_text));
        let staged = StagedFile::write(
            self.dir.join(format!(".{}.{}.tmp", name, KEY_EXTENSION)),
            contents.as_bytes(),
        )
        .await?;
        staged.commit(&self.key_path(name)).await?;

        debug!("Saved credential '{}' to {}", name, self.dir.display());
        Ok(())
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, KEY_EXTENSION))
    }
}

/// Split a credential file into the private key and the optional
/// certificate that follows it.
fn split_credential(text: &str) -> (&str, Option<&str>) {
    let Some(end) = text.find(PRIVATE_KEY_END) else {
        return (text, None);
    };
    let (pem, rest) = text.split_at(end + PRIVATE_KEY_END.len());
    let rest = rest.trim();
    (pem, (!rest.is_empty()).then_some(rest))
}

/// Private file written under a temporary name.
///
/// Removed on drop unless [`StagedFile::commit`] renamed it into place.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    async fn write(path: PathBuf, contents: &[u8]) -> Result<Self, TshError> {
        let staged = Self {
            path,
            committed: false,
        };
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&staged.path)
            .await
            .map_err(|e| store_error(&staged.path, e))?;
        file.write_all(contents)
            .await
            .map_err(|e| store_error(&staged.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| store_error(&staged.path, e))?;
        restrict_permissions(&staged.path, 0o600).await?;
        Ok(staged)
    }

    async fn commit(mut self, dest: &Path) -> Result<(), TshError> {
        fs::rename(&self.path, dest).await.map_err(|e| {
            store_error(
                dest.parent().unwrap_or(Path::new(".")),
                format!("failed to install {}: {}", dest.display(), e),
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed
            && let Err(e) = std::fs::remove_file(&self.path)
        {
            debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

fn store_error(dir: &Path, reason: impl ToString) -> TshError {
    TshError::LocalStore {
        path: dir.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(format!("invalid credential name '{}'", name));
    }
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) -> Result<(), TshError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| store_error(path, e))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), TshError> {
    Ok(())
}
