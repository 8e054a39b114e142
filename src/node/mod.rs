//! Node handles
//!
//! A [`NodeHandle`] is the only way to act on a provisioned node. It owns the
//! runner that executes inside the node and caches metadata that does not
//! change for the lifetime of the container (its addresses and published
//! ports).

mod spec;

pub use spec::{cluster_label, list_nodes, parse_node_list, NodeRole, NodeSpec, API_SERVER_CONTAINER_PORT};

use crate::command::{Command, Runner};
use crate::error::Context;
use crate::oci::ContainerRuntime;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// `docker inspect` format yielding `<ipv4>,<ipv6>`
const IP_FORMAT: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}},{{.GlobalIPv6Address}}{{end}}";

/// Lifecycle of a node container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotCreated,
    Created,
    Running,
    Stopped,
    Deleted,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::NotCreated => write!(f, "NotCreated"),
            NodeState::Created => write!(f, "Created"),
            NodeState::Running => write!(f, "Running"),
            NodeState::Stopped => write!(f, "Stopped"),
            NodeState::Deleted => write!(f, "Deleted"),
        }
    }
}

/// IPv4 and IPv6 address of a node; the IPv6 one is empty without a global v6 address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub ipv4: String,
    pub ipv6: String,
}

#[derive(Debug, Default)]
struct NodeCache {
    /// set at most once
    address: Option<NodeAddress>,
    /// container port -> host port
    ports: HashMap<u16, u16>,
}

/// Handle to a node container
pub struct NodeHandle {
    name: String,
    runner: Arc<dyn Runner>,
    runtime: Arc<dyn ContainerRuntime>,
    state: RwLock<NodeState>,
    cache: RwLock<NodeCache>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NodeHandle {
    /// Handle for an existing container, by name or id
    pub fn from_name(name: impl Into<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_state(name.into(), runtime, NodeState::Created)
    }

    pub(crate) fn with_state(name: String, runtime: Arc<dyn ContainerRuntime>, state: NodeState) -> Self {
        let runner = runtime.node_runner(&name);
        Self {
            name,
            runner,
            runtime,
            state: RwLock::new(state),
            cache: RwLock::new(NodeCache::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Runner executing inside this node
    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    /// Host port published for `container_port`, if known
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.cache.read().ports.get(&container_port).copied()
    }

    pub(crate) fn set_ports(&self, ports: HashMap<u16, u16>) {
        self.cache.write().ports = ports;
    }

    /// Write `content` to `dest` inside the node with the given mode.
    ///
    /// This is three separate commands (mkdir, copy, chmod). A failure part
    /// way leaves whatever the earlier steps did in place; retry the whole
    /// write.
    pub fn write_file(&self, dest: &str, content: &str, mode: u32) -> Result<()> {
        self.ensure_exists()?;

        let dir = match dest.rsplit_once('/') {
            Some(("", _)) => "/",
            Some((dir, _)) => dir,
            None => ".",
        };
        self.runner
            .combined_output(&Command::new("mkdir").args(["-p", dir]), None)
            .with_context(|| format!("failed to create directory {}", dir))?;

        let mut input = content.as_bytes();
        self.runner
            .combined_output(&Command::new("cp").args(["/dev/stdin", dest]), Some(&mut input))
            .with_context(|| format!("failed to run: cp /dev/stdin {}", dest))?;

        let mode = format!("{:o}", mode);
        self.runner
            .combined_output(&Command::new("chmod").args([mode.as_str(), dest]), None)
            .with_context(|| format!("failed to run: chmod {} {}", mode, dest))?;
        Ok(())
    }

    /// Addresses of the node, looked up once and cached
    pub fn ip(&self) -> Result<NodeAddress> {
        if let Some(address) = self.cache.read().address.clone() {
            return Ok(address);
        }

        let lines = self
            .runtime
            .inspect(&self.name, IP_FORMAT)
            .context("failed to get container details")?;
        let address = parse_address(&lines)?;

        // a concurrent caller may have won the race; keep its value
        let mut cache = self.cache.write();
        Ok(cache.address.get_or_insert(address).clone())
    }

    /// Import an image archive into the node's containerd
    pub fn load_image_archive(&self, mut image: impl Read + Send) -> Result<()> {
        self.ensure_exists()?;
        let cmd = Command::new("ctr").args(["--namespace=k8s.io", "images", "import", "-"]);
        self.runner
            .combined_output(&cmd, Some(&mut image))
            .context("failed to load image")?;
        Ok(())
    }

    /// Pause the node's processes
    pub fn stop(&self) -> Result<()> {
        let state = self.state();
        if matches!(state, NodeState::NotCreated | NodeState::Stopped | NodeState::Deleted) {
            return Err(Error::InvalidState {
                current: state.to_string(),
                expected: "Created or Running".into(),
            });
        }
        self.runtime
            .pause(&self.name)
            .with_context(|| format!("stopping node {}", self.name))?;
        self.set_state(NodeState::Stopped);
        Ok(())
    }

    /// Force-remove the node container and its volumes
    pub fn delete(&self) -> Result<()> {
        self.ensure_exists()?;
        self.runtime
            .remove(&self.name)
            .with_context(|| format!("deleting node {}", self.name))?;
        self.set_state(NodeState::Deleted);
        Ok(())
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }

    fn ensure_exists(&self) -> Result<()> {
        match self.state() {
            NodeState::Deleted | NodeState::NotCreated => Err(Error::InvalidState {
                current: self.state().to_string(),
                expected: "an existing container".into(),
            }),
            _ => Ok(()),
        }
    }
}

fn parse_address(lines: &[String]) -> Result<NodeAddress> {
    if lines.len() != 1 {
        return Err(Error::Resolution(format!(
            "expected one line of addresses, got {} lines",
            lines.len()
        )));
    }
    let ips: Vec<&str> = lines[0].split(',').collect();
    if ips.len() != 2 {
        return Err(Error::Resolution(format!(
            "container addresses should have 2 values, got {} values",
            ips.len()
        )));
    }
    Ok(NodeAddress {
        ipv4: ips[0].to_string(),
        ipv6: ips[1].to_string(),
    })
}
