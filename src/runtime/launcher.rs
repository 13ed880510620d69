/// Operator container launch protocol
///
/// The runtime client is started detached and prints the container id on
/// stdout. A drain task forwards stdout lines over a channel while the launch
/// task races it against the client exiting. Stderr is collected by its own
/// task so a chatty client never stalls on a full pipe. The id reaches the engine through
/// a oneshot; the engine bounds its wait and cancels the launch on timeout.

use crate::error::SizerError;
use crate::runtime::docker::ContainerRuntime;
use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 64 hex characters plus the trailing newline
pub const CONTAINER_ID_LINE_LEN: usize = 65;

/// A launch in flight whose container id has not been handed back yet
pub struct OperatorLaunch {
    operator: String,
    id_rx: oneshot::Receiver<String>,
    task: JoinHandle<Result<i64>>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// A container that is up, with its launch task still waiting for it to exit
pub struct RunningOperator {
    pub id: String,
    task: JoinHandle<Result<i64>>,
    finished: CancellationToken,
}

/// Start `command` (a detached run of the runtime client) for `operator`.
pub fn spawn_operator<R>(runtime: Arc<R>, command: Command, operator: &str) -> OperatorLaunch
where
    R: ContainerRuntime + ?Sized + 'static,
{
    let (id_tx, id_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let finished = CancellationToken::new();

    let task = tokio::spawn(drive_launch(
        runtime,
        command,
        operator.to_string(),
        id_tx,
        cancel.clone(),
        finished.clone(),
    ));

    OperatorLaunch {
        operator: operator.to_string(),
        id_rx,
        task,
        cancel,
        finished,
    }
}

impl OperatorLaunch {
    /// Wait at most `timeout` for the container id.
    ///
    /// On timeout the client and the drain task are killed and
    /// `SizerError::IdentifierTimeout` is returned.
    pub async fn acquire(self, timeout: Duration) -> Result<RunningOperator> {
        let Self {
            operator,
            id_rx,
            task,
            cancel,
            finished,
        } = self;

        match tokio::time::timeout(timeout, id_rx).await {
            Ok(Ok(id)) => Ok(RunningOperator { id, task, finished }),
            // The launch task dropped the sender: it failed, and says why
            Ok(Err(_)) => match task.await.context("launcher task panicked")? {
                Err(e) => Err(e),
                Ok(_) => Err(SizerError::Protocol {
                    operator,
                    detail: "launcher finished without a container id".into(),
                }
                .into()),
            },
            Err(_) => {
                tracing::warn!("⏰ Obtaining container id timed out. Operator {} failed", operator);
                cancel.cancel();
                let _ = task.await;
                Err(SizerError::IdentifierTimeout {
                    operator,
                    waited: timeout,
                }
                .into())
            }
        }
    }
}

impl RunningOperator {
    /// Fires once the launch task has returned, successfully or not
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Final exit status of the container, as reported by the runtime
    pub async fn exit_status(self) -> Result<i64> {
        self.task.await.context("launcher task panicked")?
    }
}

/// Validate one drained stdout line against the id contract.
pub fn parse_container_id(line: &str, operator: &str) -> Result<String> {
    if line.len() != CONTAINER_ID_LINE_LEN {
        return Err(SizerError::Protocol {
            operator: operator.to_string(),
            detail: format!(
                "the output of the runtime should be the 64 character container id, got {line:?} instead"
            ),
        }
        .into());
    }
    Ok(line.trim().to_string())
}

async fn drain_lines<S>(stream: S, lines: mpsc::UnboundedSender<String>)
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if lines.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

async fn drive_launch<R>(
    runtime: Arc<R>,
    mut command: Command,
    operator: String,
    id_tx: oneshot::Sender<String>,
    cancel: CancellationToken,
    finished: CancellationToken,
) -> Result<i64>
where
    R: ContainerRuntime + ?Sized,
{
    let _finished = finished.drop_guard();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start runtime client for operator `{operator}`"))?;
    tracing::info!("🚀 Running operator {} ...", operator);

    let stdout = child.stdout.take().context("runtime client stdout not captured")?;
    let stderr = child.stderr.take().context("runtime client stderr not captured")?;
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    let drain = tokio::spawn(drain_lines(stdout, line_tx));
    let mut errors = tokio::spawn(collect_stderr(stderr));

    let acquired = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            drain.abort();
            errors.abort();
            anyhow::bail!("launch of operator `{operator}` cancelled");
        }
        acquired = acquire_id(&mut child, &mut line_rx, &mut errors, &operator) => acquired,
    };
    drain.abort();

    let id = match acquired {
        Ok(id) => id,
        Err(e) => {
            let _ = child.kill().await;
            return Err(e);
        }
    };
    tracing::info!("🆔 The container id is: {}", id);
    let _ = id_tx.send(id.clone());

    let client_status = child
        .wait()
        .await
        .context("failed waiting for runtime client")?;
    tracing::debug!("Runtime client returned with {}", client_status);

    // The client exits as soon as the container is detached; only the
    // container's own status says whether the operator succeeded.
    let status = runtime.wait(&id).await?;
    if status == 0 {
        tracing::debug!("✅ Operator {} finished successfully with exit code 0", operator);
    } else {
        tracing::error!("❌ Operator {} failed with exit code {}", operator, status);
    }
    Ok(status)
}

async fn collect_stderr<S>(mut stream: S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut message = String::new();
    let _ = stream.read_to_string(&mut message).await;
    message
}

async fn acquire_id(
    child: &mut Child,
    lines: &mut mpsc::UnboundedReceiver<String>,
    errors: &mut JoinHandle<String>,
    operator: &str,
) -> Result<String> {
    let status = tokio::select! {
        biased;
        Some(line) = lines.recv() => return parse_container_id(&line, operator),
        status = child.wait() => status.context("failed waiting for runtime client")?,
    };

    // The client may print the id and exit before the drain task forwarded it
    if let Some(line) = lines.recv().await {
        return parse_container_id(&line, operator);
    }

    let message = errors.await.unwrap_or_default();

    if status.success() {
        return Err(SizerError::Protocol {
            operator: operator.to_string(),
            detail: "runtime client exited without printing a container id".into(),
        }
        .into());
    }

    tracing::warn!(
        "⚠️ Operator {} failed to start with return code {:?}",
        operator,
        status.code()
    );
    Err(SizerError::LaunchFailed {
        operator: operator.to_string(),
        code: status.code(),
        stderr: message.trim().to_string(),
    }
    .into())
}
