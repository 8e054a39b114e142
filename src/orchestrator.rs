//! Bootstrapper: turns a node container into a single-node cluster

use crate::command::{Runner, WithTimeout};
use crate::config::{ClusterConfig, FailurePolicy};
use crate::error::Context;
use crate::kube::kubeadm::{self, API_BIND_PORT, KUBEADM_CONFIG_PATH};
use crate::kube::kubeconfig::{self, join_host_port};
use crate::kube::{cni, BootstrapConfig};
use crate::node::{list_nodes, NodeAddress, NodeHandle, NodeSpec, API_SERVER_CONTAINER_PORT};
use crate::oci::{ContainerRuntime, Docker};
use crate::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Steps of [`Bootstrapper::up`], in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AcquireImage,
    CreateNode,
    ResolveAddress,
    RenderConfig,
    DeliverConfig,
    InitCluster,
    RemoveTaint,
    InstallNetwork,
    ExtractCredentials,
    PersistCredentials,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::AcquireImage => "acquire node image",
            Phase::CreateNode => "create node",
            Phase::ResolveAddress => "resolve node address",
            Phase::RenderConfig => "render kubeadm config",
            Phase::DeliverConfig => "deliver kubeadm config",
            Phase::InitCluster => "initialize cluster",
            Phase::RemoveTaint => "remove control-plane taint",
            Phase::InstallNetwork => "install overlay network",
            Phase::ExtractCredentials => "extract credentials",
            Phase::PersistCredentials => "persist credentials",
        };
        f.write_str(name)
    }
}

/// A bootstrapped cluster
#[derive(Debug)]
pub struct Cluster {
    pub node: NodeHandle,
    pub address: NodeAddress,
    /// Credential file on the host
    pub kubeconfig: PathBuf,
}

/// Creates, stops and deletes the cluster described by a [`ClusterConfig`]
pub struct Bootstrapper {
    config: ClusterConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Bootstrapper {
    /// Bootstrapper driving the local `docker` CLI
    pub fn new(config: ClusterConfig) -> Result<Self> {
        Self::with_runtime(config, Arc::new(Docker::new()))
    }

    pub fn with_runtime(config: ClusterConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, runtime })
    }

    /// Bootstrapper for managing an existing profile.
    ///
    /// Only the profile is checked, so it can stop, delete and list nodes.
    /// [`up`](Self::up) still rejects it unless the rest of the config is valid.
    pub fn for_profile(config: ClusterConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        config.validate_profile()?;
        Ok(Self { config, runtime })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The control-plane node this configuration produces
    pub fn node_spec(&self) -> NodeSpec {
        let config = &self.config;
        let mut spec = NodeSpec::control_plane(
            &config.profile,
            config.node_image(),
            &config.host_ip,
            config.host_port,
        );
        spec.ipv6 = config.ipv6;
        spec.cpus = config.cpus.clone();
        spec.memory = config.memory.clone();
        spec.envs = config.envs.clone();
        spec.extra_mounts = config.extra_mounts.clone();
        spec.extra_port_mappings = config.extra_port_mappings.clone();
        spec
    }

    /// Where the cluster credentials are persisted
    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        let dir = match &self.config.kubeconfig_dir {
            Some(dir) => dir.clone(),
            None => kubeconfig::default_kubeconfig_dir()?,
        };
        Ok(kubeconfig::kubeconfig_path(&dir, &self.config.profile))
    }

    /// Bring the cluster up.
    ///
    /// Phases run strictly in order and nothing is retried. If a phase fails
    /// after the node container may exist, the configured [`FailurePolicy`]
    /// decides whether it is removed; the phase error is returned either way.
    pub fn up(&self) -> Result<Cluster> {
        self.config.validate()?;
        let spec = self.node_spec();
        tracing::info!(profile = %self.config.profile, node = %spec.name, image = %spec.image, "bootstrapping cluster");

        run_phase(Phase::AcquireImage, || {
            self.runtime
                .pull_if_not_present(&spec.image, false, self.config.pull_timeout)
        })?;

        match self.provision(&spec) {
            Ok(cluster) => {
                tracing::info!(
                    profile = %self.config.profile,
                    kubeconfig = %cluster.kubeconfig.display(),
                    "cluster is ready"
                );
                Ok(cluster)
            }
            Err(e) => {
                self.handle_failure(&spec);
                Err(e)
            }
        }
    }

    fn provision(&self, spec: &NodeSpec) -> Result<Cluster> {
        let node = run_phase(Phase::CreateNode, || spec.create(&self.runtime))?;
        let address = run_phase(Phase::ResolveAddress, || node.ip())?;

        let bootstrap = self.bootstrap_config(&address);
        let rendered = run_phase(Phase::RenderConfig, || kubeadm::render_config(&bootstrap))?;
        run_phase(Phase::DeliverConfig, || {
            node.write_file(KUBEADM_CONFIG_PATH, &rendered, 0o644)
        })?;

        let bounded;
        let runner: &dyn Runner = match self.config.command_timeout {
            Some(timeout) => {
                bounded = WithTimeout::new(node.runner(), timeout);
                &bounded
            }
            None => node.runner(),
        };

        run_phase(Phase::InitCluster, || {
            let output = kubeadm::init(runner, KUBEADM_CONFIG_PATH)?;
            tracing::debug!(%output, "kubeadm init finished");
            Ok(())
        })?;
        run_phase(Phase::RemoveTaint, || kubeadm::remove_master_taint(runner))?;
        run_phase(Phase::InstallNetwork, || {
            cni::install_overlay_network(runner, &self.config.pod_subnet)
        })?;

        let host_port = node
            .host_port(API_SERVER_CONTAINER_PORT)
            .unwrap_or(self.config.host_port);
        let credentials = run_phase(Phase::ExtractCredentials, || {
            kubeconfig::generate_kubeconfig(runner, &self.config.host_ip, host_port)
        })?;
        let path = run_phase(Phase::PersistCredentials, || {
            let path = self.kubeconfig_path()?;
            kubeconfig::write_kubeconfig(&credentials, &path)?;
            Ok(path)
        })?;

        Ok(Cluster {
            node,
            address,
            kubeconfig: path,
        })
    }

    fn bootstrap_config(&self, address: &NodeAddress) -> BootstrapConfig {
        let config = &self.config;
        let node_address = if config.ipv6 && !address.ipv6.is_empty() {
            address.ipv6.clone()
        } else {
            address.ipv4.clone()
        };
        BootstrapConfig {
            cluster_name: config.profile.clone(),
            kubernetes_version: config.kubernetes_version.clone(),
            control_plane_endpoint: join_host_port(&node_address, API_SERVER_CONTAINER_PORT),
            api_bind_port: API_BIND_PORT,
            api_server_address: config.host_ip.clone(),
            control_plane: true,
            node_address,
            token: config.token.clone(),
            pod_subnet: config.pod_subnet.clone(),
            service_subnet: config.service_subnet.clone(),
            ipv6: config.ipv6,
            derived_tag: None,
        }
    }

    fn handle_failure(&self, spec: &NodeSpec) {
        match self.config.failure_policy {
            FailurePolicy::LeaveForInspection => {
                tracing::warn!(node = %spec.name, "bootstrap failed, leaving node for inspection");
            }
            FailurePolicy::Teardown => {
                tracing::info!(node = %spec.name, "bootstrap failed, removing node");
                if let Err(e) = spec.delete(self.runtime.as_ref()) {
                    tracing::warn!(node = %spec.name, error = %e, "failed to remove node");
                }
            }
        }
    }

    /// Remove every node of the profile and its credential file
    pub fn down(&self) -> Result<()> {
        for name in self.nodes()? {
            tracing::info!(node = %name, "deleting node");
            self.runtime
                .remove(&name)
                .with_context(|| format!("deleting node {}", name))?;
        }

        let path = self.kubeconfig_path()?;
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed kubeconfig"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
        Ok(())
    }

    /// Pause every node of the profile
    pub fn stop(&self) -> Result<()> {
        for name in self.nodes()? {
            tracing::info!(node = %name, "stopping node");
            self.runtime
                .pause(&name)
                .with_context(|| format!("stopping node {}", name))?;
        }
        Ok(())
    }

    /// Names of the profile's node containers
    pub fn nodes(&self) -> Result<Vec<String>> {
        list_nodes(self.runtime.as_ref(), &self.config.profile)
    }
}

fn run_phase<T>(phase: Phase, f: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::info!(%phase, "starting");
    let started = Instant::now();
    let value = f().with_context(|| format!("failed to {}", phase))?;
    tracing::debug!(%phase, elapsed = ?started.elapsed(), "done");
    Ok(value)
}
