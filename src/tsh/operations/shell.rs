//! Remote command execution and interactive shells.

use crossterm::terminal;
use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::tsh::client::RemoteSession;
use crate::tsh::error::TshError;

const OPERATION: &str = "connect";

/// Puts the local terminal in raw mode and restores it when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, TshError> {
        terminal::enable_raw_mode().map_err(|e| {
            TshError::operation(OPERATION, format!("failed to enter raw mode: {}", e))
        })?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Map the remote exit status onto the operation result.
pub(super) fn exit_status_result(exit_status: Option<u32>) -> Result<(), TshError> {
    match exit_status {
        Some(0) => Ok(()),
        Some(code) => Err(TshError::operation(
            OPERATION,
            format!("remote command exited with status {}", code),
        )),
        None => {
            debug!("Channel closed without an exit status");
            Ok(())
        }
    }
}

/// Run `command` on the target, streaming its output to the local
/// stdout and stderr.
pub(super) async fn run_command(session: &RemoteSession, command: &str) -> Result<(), TshError> {
    let mut channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("Failed to open channel: {}", e)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("Failed to execute command: {}", e)))?;

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut exit_status: Option<u32> = None;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                write_all(&mut stdout, &data).await?;
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    write_all(&mut stderr, &data).await?;
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                exit_status = Some(code);
            }
            Some(ChannelMsg::Eof) => {
                if exit_status.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    if let Err(e) = channel.close().await {
        debug!("Failed to close exec channel: {}", e);
    }
    exit_status_result(exit_status)
}

/// Open a PTY shell on the target wired to the local terminal.
pub(super) async fn run_shell(session: &RemoteSession) -> Result<(), TshError> {
    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());

    let mut channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("Failed to open channel: {}", e)))?;

    channel
        .request_pty(true, &term, u32::from(cols), u32::from(rows), 0, 0, &[])
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("PTY request failed: {}", e)))?;
    channel
        .request_shell(true)
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("Shell request failed: {}", e)))?;

    let raw_mode = RawModeGuard::enable()?;

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut buf = vec![0u8; 1024];
    let mut stdin_open = true;
    let mut exit_status: Option<u32> = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf), if stdin_open => {
                match read {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        if let Err(e) = channel.eof().await {
                            debug!("Failed to send EOF to shell channel: {}", e);
                        }
                    }
                    Ok(n) => {
                        channel.data(&buf[..n]).await.map_err(|e| {
                            TshError::operation(OPERATION, format!("failed to send input: {}", e))
                        })?;
                    }
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => write_all(&mut stdout, &data).await?,
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            write_all(&mut stderr, &data).await?;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                        exit_status = Some(code);
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    drop(raw_mode);
    exit_status_result(exit_status)
}

async fn write_all<W>(out: &mut W, data: &[u8]) -> Result<(), TshError>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(data)
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("failed to write output: {}", e)))?;
    out.flush()
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("failed to write output: {}", e)))
}
