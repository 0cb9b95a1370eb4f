// Script Process
// Spawns the interpreter for one script and streams its merged stdout/stderr output

use crate::error::{ServiceError, ServiceResult};

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use bytes::{Buf, BytesMut};
use tokio::process::{Child, Command};
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

type OutputSegments = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Splits process output on `\n` and `\r`.
///
/// Text that has no terminator yet is handed over as soon as it is read, so a
/// progress meter redrawn with carriage returns streams live instead of
/// waiting for the next newline. A trailing incomplete UTF-8 sequence stays
/// buffered until the rest of it arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputCodec;

impl Decoder for OutputCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            if buf.is_empty() {
                return Ok(None);
            }
            let segment = match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    let segment = buf.split_to(end);
                    buf.advance(1);
                    segment
                }
                None => {
                    let end = complete_utf8_len(buf);
                    if end == 0 {
                        return Ok(None);
                    }
                    buf.split_to(end)
                }
            };
            // "\r\n" and blank redraws leave empty segments
            if !segment.is_empty() {
                return Ok(Some(String::from_utf8_lossy(&segment).into_owned()));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        match self.decode(buf)? {
            Some(segment) => Ok(Some(segment)),
            None if buf.is_empty() => Ok(None),
            None => {
                let rest = buf.split();
                Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
            }
        }
    }
}

/// Length of the prefix of `bytes` that does not stop inside a UTF-8 sequence
fn complete_utf8_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

/// Fully resolved command line for one script
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    pub program: PathBuf,
    pub program_args: Vec<String>,
    pub script: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ScriptCommand {
    pub fn new(program: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            script: script.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Space-joined form shown in the `Executing:` announcement
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.program_args.iter().cloned())
            .chain(std::iter::once(self.script.clone()))
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running script
pub struct ScriptProcess {
    child: Child,
    output: OutputSegments,
}

impl ScriptProcess {
    pub fn spawn(command: &ScriptCommand) -> ServiceResult<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.program_args);
        cmd.arg(&command.script);
        cmd.args(&command.args);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Worker("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::Worker("stderr was not captured".to_string()))?;

        let stdout = FramedRead::new(stdout, OutputCodec);
        let stderr = FramedRead::new(stderr, OutputCodec);
        debug!(pid = ?child.id(), command = %command.command_line(), "script spawned");

        Ok(Self {
            child,
            output: Box::pin(stdout.merge(stderr)),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output segment from either stream; `None` once both are closed
    pub async fn next_output(&mut self) -> Option<String> {
        loop {
            match self.output.next().await? {
                Ok(segment) => return Some(segment),
                Err(e) => warn!(error = %e, "unreadable output skipped"),
            }
        }
    }

    /// Wait for exit; `None` when the process was ended by a signal
    pub async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    /// Ask the process to stop, killing it if it is still alive after `grace`
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            if send_terminate(pid) {
                if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
                    debug!(pid, "script terminated");
                    return status.map(|_| ());
                }
            }
        }

        warn!(pid = ?self.child.id(), "script did not stop in time, killing");
        self.child.kill().await
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    i32::try_from(pid)
        .map(|pid| kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> bool {
    false
}
