//! `docker` CLI wrapper

use super::{ContainerRuntime, RunOptions};
use crate::command::{Command, LocalRunner, NodeRunner, Runner};
use crate::error::Context;
use crate::{ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;

/// Container runtime driven through the `docker` CLI.
///
/// The engine binary is configurable so any docker-compatible CLI (podman,
/// nerdctl) can be used.
#[derive(Clone)]
pub struct Docker {
    engine: String,
    runner: Arc<dyn Runner>,
}

impl Default for Docker {
    fn default() -> Self {
        Self::new()
    }
}

impl Docker {
    pub fn new() -> Self {
        Self::with_runner("docker", Arc::new(LocalRunner::new()))
    }

    /// Use `engine` as the CLI binary and `runner` to execute it
    pub fn with_runner(engine: impl Into<String>, runner: Arc<dyn Runner>) -> Self {
        Self {
            engine: engine.into(),
            runner,
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    fn command(&self) -> Command {
        Command::new(&self.engine)
    }

    fn output(&self, cmd: Command) -> Result<String> {
        self.runner.combined_output(&cmd, None)
    }
}

impl ContainerRuntime for Docker {
    fn create_container(&self, image: &str, options: &RunOptions) -> Result<()> {
        let mut cmd = self.command().arg("run").args(options.run_args.iter().cloned());
        for mount in &options.mounts {
            cmd = cmd.arg("--volume").arg(mount.to_volume_arg());
        }
        for mapping in &options.port_mappings {
            cmd = cmd.arg("--publish").arg(mapping.to_publish_arg());
        }
        let cmd = cmd.arg(image);

        self.output(cmd)
            .with_context(|| format!("failed to create container from {}", image))?;
        Ok(())
    }

    fn inspect(&self, name: &str, format: &str) -> Result<Vec<String>> {
        let cmd = self.command().args(["inspect", "-f", format, name]);
        let output = self
            .output(cmd)
            .with_context(|| format!("failed to inspect {}", name))?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn pull_if_not_present(&self, image: &str, force: bool, timeout: Duration) -> Result<()> {
        if !force {
            let present = self.command().args(["inspect", "--type=image", image]);
            match self.runner.run(&present) {
                Ok(()) => {
                    tracing::debug!(image, "image already present");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Execution => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(image, ?timeout, "pulling image");
        let pull = self.command().args(["pull", image]).timeout(timeout);
        self.output(pull)
            .with_context(|| format!("failed to pull image {}", image))?;
        Ok(())
    }

    fn userns_remap(&self) -> Result<bool> {
        let cmd = self.command().args(["info", "--format", "{{json .SecurityOptions}}"]);
        let output = self.output(cmd).context("failed to query security options")?;

        let options: Option<Vec<String>> =
            serde_json::from_str(output.trim()).context("failed to parse security options")?;
        Ok(options
            .unwrap_or_default()
            .iter()
            .any(|opt| opt.contains("name=userns")))
    }

    fn list(&self, label: &str, format: &str) -> Result<Vec<String>> {
        let filter = format!("label={}", label);
        let cmd = self.command().args([
            "ps",
            "-q",         // quiet output for parsing
            "-a",         // show stopped nodes
            "--no-trunc", // don't truncate
            "--filter",
            filter.as_str(),
            "--format",
            format,
        ]);
        let output = self
            .output(cmd)
            .with_context(|| format!("failed to list containers labelled {}", label))?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.output(self.command().args(["rm", "-f", "-v", name]))?;
        Ok(())
    }

    fn pause(&self, name: &str) -> Result<()> {
        self.output(self.command().args(["pause", name]))?;
        Ok(())
    }

    fn node_runner(&self, name: &str) -> Arc<dyn Runner> {
        Arc::new(NodeRunner::new(&self.engine, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{Mount, PortMapping};
    use crate::testing::ScriptedRunner;

    fn scripted_docker(runner: ScriptedRunner) -> (Docker, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (Docker::with_runner("docker", runner.clone()), runner)
    }

    #[test]
    fn test_create_container_args() {
        let (docker, runner) = scripted_docker(ScriptedRunner::new());
        let options = RunOptions {
            run_args: vec!["-d".into(), "--name".into(), "n1".into()],
            mounts: vec![Mount::new("/src", "/dst")],
            port_mappings: vec![PortMapping::new("127.0.0.1", 40000, 6443)],
        };

        docker.create_container("kindest/node:v1.15.0", &options).unwrap();

        let seen = runner.calls();
        assert_eq!(
            seen[0].command.get_args(),
            [
                "run", "-d", "--name", "n1", "--volume", "/src:/dst", "--publish",
                "127.0.0.1:40000:6443/tcp", "kindest/node:v1.15.0"
            ]
        );
    }

    #[test]
    fn test_pull_skipped_when_present() {
        let (docker, runner) = scripted_docker(ScriptedRunner::new().ok("[{}]"));
        docker
            .pull_if_not_present("img", false, Duration::from_secs(180))
            .unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_pull_when_missing_has_timeout() {
        let (docker, runner) = scripted_docker(ScriptedRunner::new().fail("No such image").ok("pulled"));
        docker
            .pull_if_not_present("img", false, Duration::from_secs(180))
            .unwrap();

        let seen = runner.calls();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].command.get_args(), ["pull", "img"]);
        assert_eq!(seen[1].command.get_timeout(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_pull_failure_is_reported() {
        let (docker, _) = scripted_docker(ScriptedRunner::new().fail("missing").fail("network down"));
        let err = docker
            .pull_if_not_present("img", false, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.output(), Some("network down"));
    }

    #[test]
    fn test_userns_remap_detection() {
        let (docker, _) = scripted_docker(ScriptedRunner::new().ok(
            "[\"name=apparmor\",\"name=seccomp,profile=default\",\"name=userns\"]\n",
        ));
        assert!(docker.userns_remap().unwrap());

        let (docker, _) = scripted_docker(ScriptedRunner::new().ok("[\"name=seccomp,profile=default\"]"));
        assert!(!docker.userns_remap().unwrap());

        let (docker, _) = scripted_docker(ScriptedRunner::new().ok("null"));
        assert!(!docker.userns_remap().unwrap());
    }

    #[test]
    fn test_inspect_splits_lines() {
        let (docker, runner) = scripted_docker(ScriptedRunner::new().ok("172.17.0.2,\n"));
        let lines = docker.inspect("n1", "{{.Format}}").unwrap();
        assert_eq!(lines, vec!["172.17.0.2,".to_string()]);
        assert_eq!(runner.calls()[0].command.get_args(), ["inspect", "-f", "{{.Format}}", "n1"]);
    }

    #[test]
    fn test_remove_and_pause() {
        let (docker, runner) = scripted_docker(ScriptedRunner::new());
        docker.remove("n1").unwrap();
        docker.pause("n1").unwrap();

        let seen = runner.calls();
        assert_eq!(seen[0].command.get_args(), ["rm", "-f", "-v", "n1"]);
        assert_eq!(seen[1].command.get_args(), ["pause", "n1"]);
    }
}
