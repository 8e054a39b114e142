//! Host-side process execution

use super::{Command, OutputSink, Runner, Stdin};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::process::{Child, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Output kept for error reports when a command fails
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs commands directly on the host
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for LocalRunner {
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> Result<()> {
        tracing::debug!(command = %cmd, "running on host");
        execute(cmd, out, stdin, false)
    }
}

/// Writes to the caller's sink while keeping the tail for diagnostics
struct Capture<'a> {
    sink: &'a mut dyn OutputSink,
    tail: Vec<u8>,
}

impl Capture<'_> {
    fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.sink.write_all(chunk)?;
        self.tail.extend_from_slice(chunk);
        if self.tail.len() > MAX_CAPTURED_OUTPUT {
            let excess = self.tail.len() - MAX_CAPTURED_OUTPUT;
            self.tail.drain(..excess);
        }
        Ok(())
    }
}

/// Where the child's stdin comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinMode {
    /// Fed from the caller's reader
    Piped,
    /// Shares the parent's stdin so a terminal session can take input
    Inherited,
    Closed,
}

impl StdinMode {
    fn new(has_input: bool, tty: bool) -> Self {
        match (has_input, tty) {
            (true, _) => StdinMode::Piped,
            (false, true) => StdinMode::Inherited,
            (false, false) => StdinMode::Closed,
        }
    }

    fn stdio(self) -> Stdio {
        match self {
            StdinMode::Piped => Stdio::piped(),
            StdinMode::Inherited => Stdio::inherit(),
            StdinMode::Closed => Stdio::null(),
        }
    }
}

/// Spawn `cmd`, feed `stdin`, merge stdout and stderr into `out` and wait.
///
/// With `tty` set and no `stdin`, the child reads the parent's stdin and
/// stays in the foreground process group. Otherwise it leads its own group
/// so a timeout takes down everything it spawned.
pub(crate) fn execute(cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>, tty: bool) -> Result<()> {
    let mode = StdinMode::new(stdin.is_some(), tty);
    let grouped = mode != StdinMode::Inherited;

    let mut process = std::process::Command::new(cmd.get_program());
    process
        .args(cmd.get_args())
        .stdin(mode.stdio())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    if grouped {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }
    let mut child = process
        .spawn()
        .map_err(|e| Error::execution(cmd, "", format!("failed to start: {}", e)))?;

    let child_stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let capture = Mutex::new(Capture {
        sink: out,
        tail: Vec::new(),
    });

    let (status, pumped) = thread::scope(|s| {
        if let (Some(input), Some(mut pipe)) = (stdin, child_stdin) {
            s.spawn(move || {
                // the pipe is closed when dropped, signalling EOF
                let _ = io::copy(input, &mut pipe);
            });
        }

        let mut pumps = Vec::with_capacity(2);
        if let Some(reader) = stdout {
            pumps.push(s.spawn(|| pump(reader, &capture)));
        }
        if let Some(reader) = stderr {
            pumps.push(s.spawn(|| pump(reader, &capture)));
        }

        let status = wait(&mut child, cmd.get_timeout(), grouped);
        let pumped = pumps
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")))
            })
            .collect::<io::Result<()>>();
        (status, pumped)
    });

    let output = String::from_utf8_lossy(&capture.into_inner().tail).into_owned();
    match status {
        Err(e) => Err(Error::execution(cmd, output, format!("failed to wait: {}", e))),
        Ok(None) => Err(Error::execution(
            cmd,
            output,
            format!("timed out after {:?}", cmd.get_timeout().unwrap_or_default()),
        )),
        Ok(Some(status)) if !status.success() => Err(Error::execution(cmd, output, status.to_string())),
        Ok(Some(_)) => pumped.map_err(|e| Error::execution(cmd, output, format!("failed to read output: {}", e))),
    }
}

fn pump(mut reader: impl Read, capture: &Mutex<Capture<'_>>) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        capture.lock().push(&buf[..n])?;
    }
}

/// Wait for the child; `None` means it was killed at the deadline
fn wait(child: &mut Child, timeout: Option<Duration>, grouped: bool) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if !(grouped && kill_group(child)) {
                child.kill()?;
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child's whole process group; descendants holding the output
/// pipes open would otherwise keep the readers blocked.
#[cfg(unix)]
fn kill_group(child: &Child) -> bool {
    let group = format!("-{}", child.id());
    let killed = std::process::Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match killed {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::warn!(pid = child.id(), %status, "failed to kill process group");
            false
        }
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_combined_output_merges_streams() {
        let cmd = Command::new("sh").args(["-c", "echo out; echo err 1>&2"]);
        let output = LocalRunner::new().combined_output(&cmd, None).unwrap();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[test]
    fn test_stdin_is_piped() {
        let mut input: &[u8] = b"hello from stdin";
        let output = LocalRunner::new()
            .combined_output(&Command::new("cat"), Some(&mut input))
            .unwrap();
        assert_eq!(output, "hello from stdin");
    }

    #[test]
    fn test_failure_carries_command_and_output() {
        let cmd = Command::new("sh").args(["-c", "echo broken; exit 3"]);
        let err = LocalRunner::new().run(&cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.output(), Some("broken\n"));
        assert!(err.to_string().contains("sh -c echo broken; exit 3"));
    }

    #[test]
    fn test_spawn_failure_is_execution_error() {
        let err = LocalRunner::new()
            .run(&Command::new("kic-definitely-not-a-binary"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_timeout_kills_process() {
        let cmd = Command::new("sleep").arg("10").timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = LocalRunner::new().run(&cmd).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_timeout_kills_descendants() {
        // the backgrounded sleep inherits the output pipes
        let cmd = Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30; echo done"])
            .timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = LocalRunner::new().run(&cmd).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_stdin_mode() {
        assert_eq!(StdinMode::new(true, false), StdinMode::Piped);
        assert_eq!(StdinMode::new(true, true), StdinMode::Piped);
        assert_eq!(StdinMode::new(false, true), StdinMode::Inherited);
        assert_eq!(StdinMode::new(false, false), StdinMode::Closed);
    }

    #[test]
    fn test_closed_stdin_reads_eof() {
        let output = LocalRunner::new().combined_output(&Command::new("cat"), None).unwrap();
        assert_eq!(output, "");
    }

    #[test]
    fn test_streams_into_sink() {
        let mut sink = Vec::new();
        LocalRunner::new()
            .combined_output_to(&Command::new("echo").arg("streamed"), &mut sink, None)
            .unwrap();
        assert_eq!(sink, b"streamed\n");
    }
}
