//! Launching the compiler and draining its output streams.

use crate::error::{PmpError, Result};
use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
    path::Path,
    process::{Command, Stdio},
    thread,
    time::Instant,
};

/// Outcome of one compiler invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionReport {
    /// Whether the child exited with code zero.
    pub success: bool,
    /// The raw exit code, when the child was not killed by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the child process in milliseconds.
    pub elapsed_ms: u128,
}

/// Runs `binary @<arg_file>` with the parent environment plus `env`
/// overrides, streaming both output streams into the build log.
///
/// Each stream is drained by its own thread so neither can stall the child
/// on a full pipe. Lines are trimmed of trailing whitespace and framed with
/// the stream name and pid; `stdout` logs at info, `stderr` at warn. Both
/// drainers are joined before the elapsed time is measured, which also fixes
/// the log ordering relative to the exit report.
pub fn execute(
    binary: &Path,
    arg_file: &Path,
    env: &HashMap<String, String>,
) -> Result<ExecutionReport> {
    let mut cmd = Command::new(binary);
    cmd.arg(format!("@{}", arg_file.display()));
    // user entries win on key collision, the rest of the environment is
    // inherited
    cmd.envs(env);
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(?cmd, "invoking protoc");
    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|err| PmpError::Execution { binary: binary.to_path_buf(), source: err })?;
    let pid = child.id();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_drainer = spawn_drainer("stdout", pid, stdout);
    let err_drainer = spawn_drainer("stderr", pid, stderr);

    let status = child
        .wait()
        .map_err(|err| PmpError::Execution { binary: binary.to_path_buf(), source: err })?;

    // join before taking the clock so that all child output precedes the
    // timing report
    for drainer in [out_drainer, err_drainer] {
        if drainer.join().is_err() {
            warn!(pid, "output drainer thread panicked");
        }
    }
    let elapsed_ms = started.elapsed().as_millis();

    let report =
        ExecutionReport { success: status.success(), exit_code: status.code(), elapsed_ms };
    if report.success {
        info!(pid, elapsed_ms, "protoc finished");
    } else {
        warn!(pid, elapsed_ms, code = ?report.exit_code, "protoc failed");
    }
    Ok(report)
}

/// Drains one stream line by line until EOF. IO errors are logged once and
/// never mask the child's exit status.
fn spawn_drainer<R>(stream: &'static str, pid: u32, source: Option<R>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let Some(source) = source else { return };
        let reader = BufReader::new(source);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    let line = line.trim_end();
                    if stream == "stdout" {
                        info!("[{stream} pid={pid}] {line}");
                    } else {
                        warn!("[{stream} pid={pid}] {line}");
                    }
                }
                Err(err) => {
                    warn!(pid, stream, %err, "failed to drain child output");
                    break;
                }
            }
        }
    })
}
