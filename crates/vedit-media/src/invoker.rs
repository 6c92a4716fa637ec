//! External process invocation with progress tracking and cancellation.
//!
//! The child's stdin is closed and both output streams are drained by a
//! dedicated task. Lines are split on `\r` as well as `\n` because the
//! encoder redraws its stats line in place. Progress updates are pushed
//! into a bounded channel with `try_send`; when the consumer lags, updates
//! are dropped instead of stalling the drain.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::command::{check_ffmpeg, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::progress::{DiagnosticParser, ProgressParser, ProgressUpdate};

/// Lines of diagnostics retained for failure reports.
pub const DEFAULT_TAIL_CAPACITY: usize = 20;

const RUNS_TOTAL: &str = "vedit_process_runs_total";
const RUN_DURATION_SECONDS: &str = "vedit_process_run_duration_seconds";

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub elapsed: Duration,
    /// Diagnostic lines read in total
    pub lines: usize,
    /// Progress updates dropped because the consumer lagged
    pub dropped_updates: usize,
    pub tail: Vec<String>,
}

/// Runs an external program to completion.
#[derive(Debug, Clone)]
pub struct EncodeInvoker {
    program: PathBuf,
    tail_capacity: usize,
    cancel: Option<watch::Receiver<bool>>,
}

impl EncodeInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            tail_capacity: DEFAULT_TAIL_CAPACITY,
            cancel: None,
        }
    }

    /// Invoker for the `ffmpeg` found in PATH.
    pub fn ffmpeg() -> MediaResult<Self> {
        Ok(Self::new(check_ffmpeg()?))
    }

    /// Kill the child and fail with `Cancelled` once the flag turns true.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_tail_capacity(mut self, lines: usize) -> Self {
        self.tail_capacity = lines.max(1);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Same invoker pointed at another program, sharing the cancel signal.
    pub fn for_program(&self, program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            tail_capacity: self.tail_capacity,
            cancel: self.cancel.clone(),
        }
    }

    /// Run a built FFmpeg command.
    pub async fn run_command(
        &self,
        cmd: &FfmpegCommand,
        total_duration_sec: Option<f64>,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> MediaResult<RunOutcome> {
        self.run(&cmd.build_args(), total_duration_sec, progress).await
    }

    /// Run with the encoder stats parser.
    pub async fn run(
        &self,
        args: &[String],
        total_duration_sec: Option<f64>,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> MediaResult<RunOutcome> {
        let parser = ProgressParser::new(total_duration_sec);
        let (outcome, _) = self.run_with_parser(args, parser, progress).await?;
        Ok(outcome)
    }

    /// Run with a custom diagnostic parser, handing the parser back on success.
    pub async fn run_with_parser<P>(
        &self,
        args: &[String],
        parser: P,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> MediaResult<(RunOutcome, P)>
    where
        P: DiagnosticParser + 'static,
    {
        let program = self.program.display().to_string();

        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        debug!(program = %program, args = %args.join(" "), "Spawning process");
        let started = Instant::now();

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                counter!(RUNS_TOTAL, "outcome" => "launch_error").increment(1);
                MediaError::ProcessLaunch {
                    program: program.clone(),
                    source,
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        let drain = tokio::spawn(drain_diagnostics(
            stderr,
            stdout,
            parser,
            progress,
            self.tail_capacity,
        ));

        let waited = self.wait_for_exit(&mut child).await;
        let elapsed = started.elapsed();
        histogram!(RUN_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                // Grandchildren may still hold the pipes open.
                drain.abort();
                let outcome = if matches!(e, MediaError::Cancelled) { "cancelled" } else { "error" };
                counter!(RUNS_TOTAL, "outcome" => outcome).increment(1);
                return Err(e);
            }
        };

        let report = drain
            .await
            .map_err(|e| MediaError::internal(format!("diagnostic drain failed: {e}")))?;

        let tail: Vec<String> = report.tail.into_iter().collect();

        if !status.success() {
            counter!(RUNS_TOTAL, "outcome" => "failed").increment(1);
            warn!(
                program = %program,
                exit_code = ?status.code(),
                last_line = tail.last().map(String::as_str).unwrap_or(""),
                "Process exited with failure"
            );
            return Err(MediaError::process_exit(program, status.code(), tail));
        }

        counter!(RUNS_TOTAL, "outcome" => "success").increment(1);
        debug!(
            program = %program,
            elapsed_ms = elapsed.as_millis() as u64,
            lines = report.lines,
            dropped_updates = report.dropped,
            "Process finished"
        );

        Ok((
            RunOutcome {
                elapsed,
                lines: report.lines,
                dropped_updates: report.dropped,
                tail,
            },
            report.parser,
        ))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn wait_for_exit(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        let Some(mut cancel) = self.cancel.clone() else {
            return Ok(child.wait().await?);
        };

        loop {
            tokio::select! {
                status = child.wait() => return Ok(status?),
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // Sender gone: cancellation can no longer happen.
                        return Ok(child.wait().await?);
                    }
                    if *cancel.borrow() {
                        info!(program = %self.program.display(), "Cancelled, killing process");
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Failed to kill cancelled process");
                        }
                        return Err(MediaError::Cancelled);
                    }
                }
            }
        }
    }
}

struct DrainReport<P> {
    parser: P,
    tail: VecDeque<String>,
    lines: usize,
    dropped: usize,
}

async fn drain_diagnostics<P, E, O>(
    stderr: E,
    stdout: O,
    mut parser: P,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
    tail_capacity: usize,
) -> DrainReport<P>
where
    P: DiagnosticParser,
    E: AsyncRead + Unpin,
    O: AsyncRead + Unpin,
{
    let mut err_lines = DiagnosticLines::new(stderr);
    let mut out_lines = DiagnosticLines::new(stdout);
    let (mut err_open, mut out_open) = (true, true);

    let mut tail = VecDeque::with_capacity(tail_capacity);
    let mut lines = 0usize;
    let mut dropped = 0usize;

    while err_open || out_open {
        let line = tokio::select! {
            next = err_lines.next_line(), if err_open => match next {
                Ok(Some(line)) => line,
                _ => { err_open = false; continue; }
            },
            next = out_lines.next_line(), if out_open => match next {
                Ok(Some(line)) => line,
                _ => { out_open = false; continue; }
            },
        };

        lines += 1;
        if let Some(update) = parser.parse_line(&line) {
            if let Some(tx) = &progress {
                match tx.try_send(update) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }

        if tail.len() == tail_capacity {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    if dropped > 0 {
        trace!(dropped, "Progress consumer lagged");
    }

    DrainReport {
        parser,
        tail,
        lines,
        dropped,
    }
}

/// Line reader splitting on both `\n` and `\r`, skipping empty lines.
struct DiagnosticLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> DiagnosticLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Cancel safe: partial lines stay buffered across dropped futures.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;

            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    self.buf.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    if !self.buf.is_empty() {
                        return Ok(Some(self.take_line()));
                    }
                }
                None => {
                    let len = available.len();
                    self.buf.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        self.buf.clear();
        line
    }
}
