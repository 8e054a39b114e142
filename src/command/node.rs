//! Execution inside a node container

use super::local::execute;
use super::{Command, OutputSink, Runner, Stdin};
use crate::Result;

/// Runs commands inside a node through `<engine> exec`
#[derive(Debug, Clone)]
pub struct NodeRunner {
    engine: String,
    node: String,
}

impl NodeRunner {
    /// `node` may be either the container name or its id
    pub fn new(engine: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            node: node.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Wrap `cmd` so it runs in the node's namespaces.
    ///
    /// Always privileged so mounts work, always `-i` so stdin can be piped,
    /// and `-t` only when output goes to an interactive terminal.
    pub fn exec_command(&self, cmd: &Command, tty: bool) -> Command {
        let mut wrapped = Command::new(&self.engine).args(["exec", "--privileged", "-i"]);
        if tty {
            wrapped = wrapped.arg("-t");
        }
        wrapped = wrapped
            .arg(&self.node)
            .arg(cmd.get_program())
            .args(cmd.get_args().iter().cloned());
        match cmd.get_timeout() {
            Some(timeout) => wrapped.timeout(timeout),
            None => wrapped,
        }
    }
}

impl Runner for NodeRunner {
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> Result<()> {
        let tty = out.is_interactive();
        let wrapped = self.exec_command(cmd, tty);
        tracing::debug!(node = %self.node, command = %cmd, tty, "running in node");
        execute(&wrapped, out, stdin, tty)
    }
}
