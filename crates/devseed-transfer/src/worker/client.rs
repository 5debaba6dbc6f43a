use std::path::Path;
use std::process::Stdio;

use tokio::fs::{File, create_dir_all, rename};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use devseed_core::{discard_temp, temp_path_for};

use crate::errors::{Result, TransferError};

use super::frame::{FrameCopy, FrameReader, write_frame};
use super::protocol::ExportRequest;

type RequestSink = Box<dyn AsyncWrite + Send + Unpin>;
type ResponseSource = Box<dyn AsyncRead + Send + Unpin>;

/// Parent side of the worker protocol: one child process for a whole run.
///
/// The child is killed if the client is dropped without `finish`.
pub struct WorkerClient {
    child: Option<Child>,
    stdin: Option<RequestSink>,
    stdout: FrameReader<ResponseSource>,
}

impl WorkerClient {
    pub fn spawn(mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransferError::Frame("worker stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransferError::Frame("worker stdout is not piped".to_string()))?;

        debug!(pid = ?child.id(), "export worker started");
        Ok(Self {
            child: Some(child),
            stdin: Some(Box::new(stdin)),
            stdout: FrameReader::new(Box::new(stdout)),
        })
    }

    /// Talk to a worker that is already running behind `requests` and
    /// `responses`, such as one served in-process over a duplex stream.
    pub fn connect<W, R>(requests: W, responses: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            child: None,
            stdin: Some(Box::new(requests)),
            stdout: FrameReader::new(Box::new(responses)),
        }
    }

    /// Send one request and stream the response into `output`.
    ///
    /// The bytes land in a hidden sibling file that is renamed over `output`
    /// once the separator arrives.
    pub async fn export(&mut self, request: &ExportRequest, output: &Path) -> Result<u64> {
        let payload = request.encode()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransferError::Frame("worker input already closed".to_string()))?;
        if let Err(err) = write_frame(stdin, &payload).await {
            warn!(error = %err, "failed to send request to export worker");
            return Err(self.exit_error().await);
        }

        if let Some(parent) = output.parent() {
            create_dir_all(parent).await?;
        }
        let temp = temp_path_for(output)?;
        let copied = {
            let mut file = File::create(&temp).await?;
            let copied = self.stdout.copy_frame(&mut file).await;
            if copied.is_ok() {
                file.sync_all().await?;
            }
            copied
        };

        match copied {
            Ok(FrameCopy::Complete(bytes)) => {
                rename(&temp, output).await?;
                Ok(bytes)
            }
            Ok(FrameCopy::Truncated(_)) => {
                discard_temp(&temp);
                Err(self.exit_error().await)
            }
            Err(err) => {
                discard_temp(&temp);
                Err(err)
            }
        }
    }

    /// Close the request stream and wait for a clean exit.
    pub async fn finish(mut self) -> Result<()> {
        self.close_requests().await;
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(TransferError::WorkerExited {
                code: status.code(),
            })
        }
    }

    async fn close_requests(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                debug!(error = %err, "worker input already closed");
            }
        }
    }

    async fn exit_error(&mut self) -> TransferError {
        self.close_requests().await;
        let Some(child) = self.child.as_mut() else {
            return TransferError::WorkerExited { code: None };
        };
        match child.wait().await {
            Ok(status) => TransferError::WorkerExited {
                code: status.code(),
            },
            Err(err) => TransferError::Io(err),
        }
    }
}
