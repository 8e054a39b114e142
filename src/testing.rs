//! Test doubles shared by unit tests

use crate::command::{Command, OutputSink, Runner, Stdin};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};

/// One command seen by a [`ScriptedRunner`]
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub command: Command,
    pub stdin: Option<String>,
}

/// Records every command and replays canned replies in order.
///
/// Once the script runs out every command succeeds with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, output: &str) -> Self {
        self.replies.lock().push_back(Ok(output.to_string()));
        self
    }

    pub fn fail(self, output: &str) -> Self {
        self.replies.lock().push_back(Err(output.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Command lines as strings, in call order
    pub fn lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.to_string()).collect()
    }
}

impl Runner for ScriptedRunner {
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> Result<()> {
        let stdin = match stdin {
            Some(input) => {
                let mut text = String::new();
                input.read_to_string(&mut text)?;
                Some(text)
            }
            None => None,
        };
        self.calls.lock().push(Call {
            command: cmd.clone(),
            stdin,
        });

        let reply = self.replies.lock().pop_front().unwrap_or(Ok(String::new()));
        match reply {
            Ok(text) => {
                out.write_all(text.as_bytes())?;
                Ok(())
            }
            Err(text) => Err(Error::execution(cmd, text, "exit status: 1")),
        }
    }
}
