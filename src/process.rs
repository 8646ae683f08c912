//! Blocking subprocess execution with timeouts and cancellation.
//!
//! Every child is started in its own process group so a timeout or a
//! cancelled run can kill the whole tree (compiler drivers, `timeout`
//! wrappers, reducer workers) without touching the controlling process.
use crate::error::{IoContext, ReduceError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Route SIGINT and SIGTERM to the cancellation flag polled by [`run`].
///
/// Only the first call installs a handler; later calls log and keep it.
pub fn install_cancel_handler() {
    if let Err(err) = ctrlc::set_handler(|| CANCELLED.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %err, "could not install interrupt handler");
    }
}

pub fn cancel_requested() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}

/// How the child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Collect both streams for inspection.
    Capture,
    /// Show progress on the caller's stderr; stdout is kept for results.
    Inherit,
    /// Discard both streams.
    Discard,
}

/// Result of one finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the child was killed after the timeout.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u128,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    /// Stdout followed by stderr, the way a `> log 2>&1` redirect sees them.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }

    pub fn describe(&self) -> String {
        if self.timed_out {
            return "timeout".to_string();
        }
        match &self.status {
            Some(status) => exit_status_string(status),
            None => "unknown status".to_string(),
        }
    }
}

pub fn exit_status_string(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        format!("exit status {code}")
    } else if let Some(signal) = status.signal() {
        format!("signal {signal}")
    } else {
        "terminated abnormally".to_string()
    }
}

/// Run `cmd` to completion, killing its process group after `timeout`.
///
/// A timeout is reported through [`ProcessOutput::timed_out`], never as an
/// error. Cancellation kills the child and returns [`ReduceError::Cancelled`].
pub fn run(cmd: &mut Command, timeout: Option<Duration>, output: Output) -> Result<ProcessOutput> {
    let program = cmd.get_program().to_string_lossy().to_string();
    let mut streams = None;
    match output {
        Output::Capture => {
            let stdout = tempfile::tempfile().io_context(|| "create stdout capture")?;
            let stderr = tempfile::tempfile().io_context(|| "create stderr capture")?;
            cmd.stdout(Stdio::from(
                stdout.try_clone().io_context(|| "clone stdout capture")?,
            ));
            cmd.stderr(Stdio::from(
                stderr.try_clone().io_context(|| "clone stderr capture")?,
            ));
            streams = Some((stdout, stderr));
        }
        Output::Inherit => {
            cmd.stdout(Stdio::from(std::io::stderr()))
                .stderr(Stdio::inherit());
        }
        Output::Discard => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }
    cmd.stdin(Stdio::null()).process_group(0);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .io_context(|| format!("spawn {program}"))?;
    let mut timed_out = false;

    let status = loop {
        if let Some(status) = child
            .try_wait()
            .io_context(|| format!("check {program} status"))?
        {
            break Some(status);
        }
        if cancel_requested() {
            kill_group(&mut child);
            tracing::warn!(program = %program, "killed child after cancellation");
            return Err(ReduceError::Cancelled);
        }
        if timeout.is_some_and(|limit| start.elapsed() > limit) {
            timed_out = true;
            kill_group(&mut child);
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let (stdout, stderr) = match streams {
        Some((mut stdout, mut stderr)) => (
            read_capture(&mut stdout).io_context(|| format!("read {program} stdout"))?,
            read_capture(&mut stderr).io_context(|| format!("read {program} stderr"))?,
        ),
        None => (String::new(), String::new()),
    };

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
        duration_ms: start.elapsed().as_millis(),
    })
}

fn kill_group(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg has no memory-safety preconditions.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn read_capture(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}
