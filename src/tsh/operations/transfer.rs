//! File transfer over SFTP.
//!
//! Upload copies a single local file. Download copies a remote file, or a
//! remote directory tree when recursion is requested. When the destination is
//! an existing directory the source's base name is appended to it.

use std::fmt;
use std::path::{Path, PathBuf};

use russh_sftp::client::SftpSession;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::tsh::client::RemoteSession;
use crate::tsh::error::TshError;

/// Totals reported after a transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: u64,
    pub bytes: u64,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s), {} byte(s)", self.files, self.bytes)
    }
}

/// Join a remote directory and an entry name with `/`.
pub(super) fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last component of a remote path, ignoring trailing slashes.
pub(super) fn remote_basename(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Where a source named `name` lands under `dest`.
pub(super) fn resolve_local_destination(dest: &Path, dest_is_dir: bool, name: &str) -> PathBuf {
    if dest_is_dir {
        dest.join(name)
    } else {
        dest.to_path_buf()
    }
}

/// Reject upload sources that are missing or not regular files.
pub(super) async fn check_upload_source(source: &Path) -> Result<(), TshError> {
    let metadata = fs::metadata(source).await.map_err(|e| {
        TshError::operation("upload", format!("cannot read {}: {}", source.display(), e))
    })?;
    if metadata.is_dir() {
        return Err(TshError::operation(
            "upload",
            format!("{} is a directory", source.display()),
        ));
    }
    Ok(())
}

async fn open_sftp(
    session: &RemoteSession,
    operation: &'static str,
) -> Result<SftpSession, TshError> {
    let channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| TshError::operation(operation, format!("Failed to open channel: {}", e)))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| TshError::operation(operation, format!("SFTP subsystem refused: {}", e)))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| TshError::operation(operation, format!("SFTP handshake failed: {}", e)))
}

pub(super) async fn upload(
    session: &RemoteSession,
    local_source: &Path,
    remote_dest: &str,
) -> Result<TransferSummary, TshError> {
    let op_error = |reason: String| TshError::operation("upload", reason);
    let sftp = open_sftp(session, "upload").await?;

    let dest_is_dir = sftp
        .metadata(remote_dest)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let remote_path = if dest_is_dir {
        let name = local_source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| op_error(format!("{} has no file name", local_source.display())))?;
        remote_join(remote_dest, &name)
    } else {
        remote_dest.to_string()
    };

    let mut local = fs::File::open(local_source)
        .await
        .map_err(|e| op_error(format!("cannot open {}: {}", local_source.display(), e)))?;
    let mut remote = sftp
        .create(remote_path.as_str())
        .await
        .map_err(|e| op_error(format!("cannot create {}: {}", remote_path, e)))?;

    let bytes = tokio::io::copy(&mut local, &mut remote)
        .await
        .map_err(|e| op_error(format!("write to {} failed: {}", remote_path, e)))?;
    remote
        .shutdown()
        .await
        .map_err(|e| op_error(format!("closing {} failed: {}", remote_path, e)))?;

    debug!("Uploaded {} -> {}", local_source.display(), remote_path);
    if let Err(e) = sftp.close().await {
        debug!("Failed to close SFTP session: {}", e);
    }
    Ok(TransferSummary { files: 1, bytes })
}

pub(super) async fn download(
    session: &RemoteSession,
    remote_source: &str,
    local_dest: &Path,
    recursive: bool,
) -> Result<TransferSummary, TshError> {
    let op_error = |reason: String| TshError::operation("download", reason);
    let sftp = open_sftp(session, "download").await?;

    let metadata = sftp
        .metadata(remote_source)
        .await
        .map_err(|e| op_error(format!("cannot stat {}: {}", remote_source, e)))?;
    if metadata.is_dir() && !recursive {
        return Err(op_error(format!(
            "{} is a directory (use --r to download recursively)",
            remote_source
        )));
    }

    let name = remote_basename(remote_source)
        .ok_or_else(|| op_error(format!("{} has no file name", remote_source)))?;
    let dest_is_dir = fs::metadata(local_dest)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let local_path = resolve_local_destination(local_dest, dest_is_dir, name);

    let mut summary = TransferSummary::default();
    if metadata.is_dir() {
        download_tree(&sftp, remote_source, &local_path, &mut summary).await?;
    } else {
        summary.bytes += download_file(&sftp, remote_source, &local_path).await?;
        summary.files += 1;
    }

    if let Err(e) = sftp.close().await {
        debug!("Failed to close SFTP session: {}", e);
    }
    Ok(summary)
}

async fn download_file(sftp: &SftpSession, remote: &str, local: &Path) -> Result<u64, TshError> {
    let op_error = |reason: String| TshError::operation("download", reason);

    let mut source = sftp
        .open(remote)
        .await
        .map_err(|e| op_error(format!("cannot open {}: {}", remote, e)))?;
    let mut target = fs::File::create(local)
        .await
        .map_err(|e| op_error(format!("cannot create {}: {}", local.display(), e)))?;

    let bytes = tokio::io::copy(&mut source, &mut target)
        .await
        .map_err(|e| op_error(format!("read from {} failed: {}", remote, e)))?;
    target
        .flush()
        .await
        .map_err(|e| op_error(format!("write to {} failed: {}", local.display(), e)))?;

    debug!("Downloaded {} -> {}", remote, local.display());
    Ok(bytes)
}

async fn download_tree(
    sftp: &SftpSession,
    remote_root: &str,
    local_root: &Path,
    summary: &mut TransferSummary,
) -> Result<(), TshError> {
    let op_error = |reason: String| TshError::operation("download", reason);
    let mut pending = vec![(remote_root.to_string(), local_root.to_path_buf())];

    while let Some((remote_dir, local_dir)) = pending.pop() {
        fs::create_dir_all(&local_dir)
            .await
            .map_err(|e| op_error(format!("cannot create {}: {}", local_dir.display(), e)))?;

        let entries = sftp
            .read_dir(remote_dir.as_str())
            .await
            .map_err(|e| op_error(format!("cannot list {}: {}", remote_dir, e)))?;

        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let remote_path = remote_join(&remote_dir, &name);
            let local_path = local_dir.join(&name);

            if entry.file_type().is_dir() {
                pending.push((remote_path, local_path));
            } else {
                summary.bytes += download_file(sftp, &remote_path, &local_path).await?;
                summary.files += 1;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod remote_paths {
        use super::*;

        #[test]
        fn test_join() {
            assert_eq!(remote_join("/remote", "a"), "/remote/a");
            assert_eq!(remote_join("/remote/", "a"), "/remote/a");
            assert_eq!(remote_join("", "a"), "a");
        }

        #[test]
        fn test_basename() {
            assert_eq!(remote_basename("/remote/dir"), Some("dir"));
            assert_eq!(remote_basename("/remote/dir/"), Some("dir"));
            assert_eq!(remote_basename("file.txt"), Some("file.txt"));
        }

        #[test]
        fn test_basename_of_root_is_none() {
            assert_eq!(remote_basename("/"), None);
            assert_eq!(remote_basename(".."), None);
        }
    }

    mod local_destination {
        use super::*;

        #[test]
        fn test_existing_directory_receives_basename() {
            let path = resolve_local_destination(Path::new("/tmp/dir"), true, "a");
            assert_eq!(path, PathBuf::from("/tmp/dir/a"));
        }

        #[test]
        fn test_other_destination_is_used_as_is() {
            let path = resolve_local_destination(Path::new("/tmp/dir"), false, "dir");
            assert_eq!(path, PathBuf::from("/tmp/dir"));
        }
    }

    mod upload_source {
        use super::*;

        #[tokio::test]
        async fn test_regular_file_is_accepted() {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join("a");
            fs::write(&file, b"data").await.unwrap();
            assert!(check_upload_source(&file).await.is_ok());
        }

        #[tokio::test]
        async fn test_directory_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let err = check_upload_source(dir.path()).await.unwrap_err();
            assert!(err.to_string().contains("is a directory"));
        }

        #[tokio::test]
        async fn test_missing_file_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let err = check_upload_source(&dir.path().join("missing")).await.unwrap_err();
            assert_eq!(err.stage(), "operation");
        }
    }

    #[test]
    fn test_summary_display() {
        let summary = TransferSummary { files: 2, bytes: 10 };
        assert_eq!(summary.to_string(), "2 file(s), 10 byte(s)");
    }
}
