//! Container runtime adapter
//!
//! kic never talks to a container engine except through [`ContainerRuntime`].
//! [`Docker`] is the implementation backed by the `docker` (or a compatible)
//! CLI.

mod docker;

pub use docker::Docker;

use crate::command::Runner;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Label applied to every node container; the profile name is appended
pub const CLUSTER_LABEL_KEY: &str = "io.k8s.sigs.kic.cluster";

/// Label carrying the node's role
pub const NODE_ROLE_KEY: &str = "io.k8s.sigs.kic.role";

/// How mount events propagate between host and container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountPropagation {
    #[default]
    None,
    HostToContainer,
    Bidirectional,
}

/// A host path bind-mounted into a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub container_path: String,
    pub host_path: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub selinux_relabel: bool,
    #[serde(default)]
    pub propagation: MountPropagation,
}

impl Mount {
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            ..Default::default()
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Value for `--volume`
    pub fn to_volume_arg(&self) -> String {
        let mut attrs = Vec::new();
        if self.readonly {
            attrs.push("ro");
        }
        if self.selinux_relabel {
            attrs.push("Z");
        }
        match self.propagation {
            MountPropagation::None => {}
            MountPropagation::HostToContainer => attrs.push("rslave"),
            MountPropagation::Bidirectional => attrs.push("rshared"),
        }

        let bind = format!("{}:{}", self.host_path, self.container_path);
        if attrs.is_empty() {
            bind
        } else {
            format!("{}:{}", bind, attrs.join(","))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// A container port published on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub listen_address: String,
    pub host_port: u16,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn new(listen_address: impl Into<String>, host_port: u16, container_port: u16) -> Self {
        Self {
            listen_address: listen_address.into(),
            host_port,
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    /// Value for `--publish`
    pub fn to_publish_arg(&self) -> String {
        let address = if self.listen_address.contains(':') {
            format!("[{}]", self.listen_address)
        } else {
            self.listen_address.clone()
        };
        format!(
            "{}:{}:{}/{}",
            address,
            self.host_port,
            self.container_port,
            self.protocol.as_str()
        )
    }
}

/// Everything needed to start a container besides the image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub run_args: Vec<String>,
    pub mounts: Vec<Mount>,
    pub port_mappings: Vec<PortMapping>,
}

/// Operations kic needs from a container engine
#[cfg_attr(test, mockall::automock)]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container from `image`
    fn create_container(&self, image: &str, options: &RunOptions) -> Result<()>;

    /// Inspect a container, returning the formatted output line by line
    fn inspect(&self, name: &str, format: &str) -> Result<Vec<String>>;

    /// Pull `image` unless it is already present (or `force` is set)
    fn pull_if_not_present(&self, image: &str, force: bool, timeout: Duration) -> Result<()>;

    /// Whether the engine remaps user namespaces
    fn userns_remap(&self) -> Result<bool>;

    /// List all containers (running or not) carrying `label`, one formatted line each
    fn list(&self, label: &str, format: &str) -> Result<Vec<String>>;

    /// Force-remove a container and its volumes
    fn remove(&self, name: &str) -> Result<()>;

    /// Pause all processes in a container
    fn pause(&self, name: &str) -> Result<()>;

    /// Runner that executes commands inside the named container
    fn node_runner(&self, name: &str) -> Arc<dyn Runner>;
}
