//! Control socket: server (during `teleflux fetch`) and client (for
//! `teleflux pause`, `cancel`, `status`, `concurrency`).
//! Protocol: one command line per connection, e.g. "pause 3"; the server
//! writes the reply and closes.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teleflux_core::control::ControlCommand;
use teleflux_core::{Orchestrator, OwnerId};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` and spawns a task that applies each received command to
/// `orchestrator` on behalf of `owner`.
pub fn spawn_control_listener(
    orchestrator: Arc<Orchestrator>,
    owner: OwnerId,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orch = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &orch, owner).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve(stream: UnixStream, orch: &Orchestrator, owner: OwnerId) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await?;
    let reply = match ControlCommand::parse(&line) {
        Ok(cmd) => {
            tracing::info!(?cmd, "control command");
            cmd.apply(orch, owner).await
        }
        Err(e) => format!("error: {e}"),
    };
    write.write_all(reply.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.shutdown().await?;
    Ok(())
}

/// Sends one command line and returns the reply, or `None` when no `fetch`
/// is listening on `socket_path`.
pub async fn send_command(socket_path: &Path, line: &str) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("connect {}", socket_path.display()))
        }
    };
    stream.write_all(format!("{line}\n").as_bytes()).await?;
    stream.shutdown().await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(Some(reply.trim_end().to_string()))
}

/// Send to the default socket path.
pub async fn send_default(line: &str) -> Result<Option<String>> {
    let path: PathBuf = teleflux_core::control::default_control_socket_path()?;
    send_command(&path, line).await
}
