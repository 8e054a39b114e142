//! Declarative node description and node creation

use super::{NodeHandle, NodeState};
use crate::error::Context;
use crate::oci::{ContainerRuntime, Mount, PortMapping, RunOptions, CLUSTER_LABEL_KEY, NODE_ROLE_KEY};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Port the API server listens on inside a control-plane node
pub const API_SERVER_CONTAINER_PORT: u16 = 6443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control-plane" => Ok(NodeRole::ControlPlane),
            other => Err(Error::Config(format!("unknown node role: {}", other))),
        }
    }
}

/// A node to create, described purely from the container side.
///
/// Starting Kubernetes inside it is not part of this; see
/// [`Bootstrapper`](crate::Bootstrapper).
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub profile: String,
    pub role: NodeRole,
    pub image: String,
    pub extra_mounts: Vec<Mount>,
    pub extra_port_mappings: Vec<PortMapping>,
    pub api_server_address: String,
    pub api_server_port: u16,
    pub ipv6: bool,
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub envs: BTreeMap<String, String>,
}

impl NodeSpec {
    /// Control-plane node for `profile`, publishing the API server on
    /// `api_server_address:api_server_port`
    pub fn control_plane(
        profile: impl Into<String>,
        image: impl Into<String>,
        api_server_address: impl Into<String>,
        api_server_port: u16,
    ) -> Self {
        let profile = profile.into();
        Self {
            name: format!("{}control-plane", profile),
            profile,
            role: NodeRole::ControlPlane,
            image: image.into(),
            extra_mounts: Vec::new(),
            extra_port_mappings: Vec::new(),
            api_server_address: api_server_address.into(),
            api_server_port,
            ipv6: false,
            cpus: None,
            memory: None,
            envs: BTreeMap::new(),
        }
    }

    /// Label marking containers of this spec's cluster
    pub fn cluster_label(&self) -> String {
        cluster_label(&self.profile)
    }

    /// Create and start the node container
    pub fn create(&self, runtime: &Arc<dyn ContainerRuntime>) -> Result<NodeHandle> {
        match self.role {
            NodeRole::ControlPlane => self.create_control_plane(runtime).context("creating control-plane node"),
        }
    }

    /// Pause the node container
    pub fn stop(&self, runtime: &dyn ContainerRuntime) -> Result<()> {
        runtime.pause(&self.name).context("stopping node")
    }

    /// Remove the node container and its volumes
    pub fn delete(&self, runtime: &dyn ContainerRuntime) -> Result<()> {
        runtime.remove(&self.name).context("deleting node")
    }

    /// Arguments for `docker run`, before mounts, ports and image
    pub fn run_args(&self, userns_remap: bool, extra_args: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(cpus) = &self.cpus {
            args.push(format!("--cpus={}", cpus));
        }
        if let Some(memory) = &self.memory {
            args.push(format!("--memory={}", memory));
        }
        let cluster_label = self.cluster_label();
        let role_label = format!("{}={}", NODE_ROLE_KEY, self.role);
        args.extend(
            [
                "-d", // detached
                "-t", // tty for entrypoint logs
                // nested containers need privileges; this also sets up
                // mounts docker would otherwise not provide
                "--privileged",
                "--security-opt",
                "seccomp=unconfined",
                "--tmpfs",
                "/tmp",
                "--tmpfs",
                "/run", // systemd wants a writable /run
                "-v",
                "/lib/modules:/lib/modules:ro",
                "--hostname",
                self.name.as_str(),
                "--name",
                self.name.as_str(),
                "--label",
                cluster_label.as_str(),
                "--label",
                role_label.as_str(),
            ]
            .map(str::to_string),
        );

        for (key, value) in &self.envs {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend(extra_args.iter().cloned());

        if userns_remap {
            // needed on daemons with userns-remap enabled
            args.push("--userns=host".to_string());
        }
        args
    }

    fn create_control_plane(&self, runtime: &Arc<dyn ContainerRuntime>) -> Result<NodeHandle> {
        let mut port_mappings = self.extra_port_mappings.clone();
        port_mappings.push(PortMapping::new(
            &self.api_server_address,
            self.api_server_port,
            API_SERVER_CONTAINER_PORT,
        ));

        let node = self.create_node(
            runtime,
            port_mappings,
            &["--expose".to_string(), self.api_server_port.to_string()],
        )?;

        // remember the published API server port so later lookups need no inspect
        node.set_ports(HashMap::from([(API_SERVER_CONTAINER_PORT, self.api_server_port)]));
        Ok(node)
    }

    fn create_node(
        &self,
        runtime: &Arc<dyn ContainerRuntime>,
        port_mappings: Vec<PortMapping>,
        extra_args: &[String],
    ) -> Result<NodeHandle> {
        let userns_remap = runtime.userns_remap()?;
        let options = RunOptions {
            run_args: self.run_args(userns_remap, extra_args),
            mounts: self.extra_mounts.clone(),
            port_mappings,
        };

        tracing::info!(node = %self.name, image = %self.image, role = %self.role, "creating node");
        runtime
            .create_container(&self.image, &options)
            .with_context(|| format!("docker run error for node {}", self.name))?;

        Ok(NodeHandle::with_state(
            self.name.clone(),
            Arc::clone(runtime),
            NodeState::Running,
        ))
    }
}

/// Label marking every container of `profile`'s cluster
pub fn cluster_label(profile: &str) -> String {
    format!("{}{}", CLUSTER_LABEL_KEY, profile)
}

/// Names of all node containers, running or not, belonging to `profile`
pub fn list_nodes(runtime: &dyn ContainerRuntime, profile: &str) -> Result<Vec<String>> {
    let label = cluster_label(profile);
    let format = format!("{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}", label);
    let lines = runtime
        .list(&label, &format)
        .with_context(|| format!("failed to list containers for {}", profile))?;
    parse_node_list(&lines)
}

/// Parse `<names>\t<label value>` lines; `<names>` may be comma separated
pub fn parse_node_list<S: AsRef<str>>(lines: &[S]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for line in lines {
        let line = line.as_ref();
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 2 {
            return Err(Error::Parse(format!(
                "invalid output when listing containers: {}",
                line
            )));
        }
        names.extend(parts[0].split(',').map(str::to_string));
    }
    Ok(names)
}
