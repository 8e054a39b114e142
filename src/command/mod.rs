//! Command execution against the host or inside a node
//!
//! Everything in kic that starts a process goes through a [`Runner`]. The two
//! implementations differ only in how a [`Command`] is wrapped before it is
//! spawned: [`LocalRunner`] runs it as-is on the host, [`NodeRunner`] enters
//! the node container first.

mod local;
mod node;

pub use local::LocalRunner;
pub use node::NodeRunner;

use crate::Result;
use std::fmt;
use std::io::{self, IsTerminal, Read, Write};
use std::time::Duration;

/// Optional input piped to a command's standard input
pub type Stdin<'a> = Option<&'a mut (dyn Read + Send)>;

/// A program and its ordered arguments
///
/// Arguments are kept as a vector and handed to the OS unchanged, so nothing
/// is ever split or re-quoted on the way to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Kill the process and fail if it has not exited after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Destination for the merged stdout/stderr of a command
pub trait OutputSink: Write + Send {
    /// Whether output lands on an interactive terminal
    fn is_interactive(&self) -> bool {
        false
    }
}

impl OutputSink for Vec<u8> {}

impl OutputSink for io::Sink {}

impl OutputSink for io::Stdout {
    fn is_interactive(&self) -> bool {
        self.is_terminal()
    }
}

impl OutputSink for io::Stderr {
    fn is_interactive(&self) -> bool {
        self.is_terminal()
    }
}

impl OutputSink for std::fs::File {
    fn is_interactive(&self) -> bool {
        self.is_terminal()
    }
}

/// Runs commands somewhere: on the host or inside a node.
///
/// All calls block until the process exits. A non-zero exit, a spawn failure
/// or an exceeded [`Command::timeout`] is reported as
/// [`Error::Execution`](crate::Error::Execution) carrying the command line and
/// whatever output was captured.
pub trait Runner: Send + Sync {
    /// Run the command, streaming merged stdout/stderr into `out`
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> Result<()>;

    /// Run the command and wait for it, discarding output on success
    fn run(&self, cmd: &Command) -> Result<()> {
        self.combined_output_to(cmd, &mut io::sink(), None)
    }

    /// Run the command and return its merged stdout/stderr
    fn combined_output(&self, cmd: &Command, stdin: Stdin<'_>) -> Result<String> {
        let mut buf = Vec::new();
        self.combined_output_to(cmd, &mut buf, stdin)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Applies a default deadline to commands that do not carry their own
pub struct WithTimeout<'a> {
    inner: &'a dyn Runner,
    timeout: Duration,
}

impl<'a> WithTimeout<'a> {
    pub fn new(inner: &'a dyn Runner, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Runner for WithTimeout<'_> {
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> Result<()> {
        if cmd.timeout.is_some() {
            return self.inner.combined_output_to(cmd, out, stdin);
        }
        let bounded = cmd.clone().timeout(self.timeout);
        self.inner.combined_output_to(&bounded, out, stdin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("kubeadm")
            .arg("init")
            .args(["--skip-token-print", "--v=6"])
            .timeout(Duration::from_secs(5));

        assert_eq!(cmd.get_program(), "kubeadm");
        assert_eq!(cmd.get_args(), ["init", "--skip-token-print", "--v=6"]);
        assert_eq!(cmd.get_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_command_display_keeps_arguments_whole() {
        let cmd = Command::new("docker").args(["--format", "{{.Names}}\t{{.Label \"x\"}}"]);
        assert_eq!(cmd.to_string(), "docker --format {{.Names}}\t{{.Label \"x\"}}");
        assert_eq!(cmd.get_args().len(), 2);
    }

    #[test]
    fn test_buffer_sinks_are_not_interactive() {
        assert!(!Vec::<u8>::new().is_interactive());
        assert!(!io::sink().is_interactive());
    }

    #[test]
    fn test_with_timeout_fills_missing_deadline() {
        let inner = ScriptedRunner::new();
        let runner = WithTimeout::new(&inner, Duration::from_secs(30));

        runner.run(&Command::new("true")).unwrap();
        runner
            .run(&Command::new("sleep").arg("1").timeout(Duration::from_secs(2)))
            .unwrap();

        let calls = inner.calls();
        assert_eq!(calls[0].command.get_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(calls[1].command.get_timeout(), Some(Duration::from_secs(2)));
    }
}
