//! Cluster configuration with builder pattern

use crate::kube::{derive_tag, parse_version};
use crate::oci::{Mount, PortMapping};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Image repository used when no image is configured
pub const DEFAULT_NODE_IMAGE_REPO: &str = "kindest/node";
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.15.0";
pub const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// What happens to a created node when bootstrapping fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep the node around so it can be debugged
    #[default]
    LeaveForInspection,
    /// Remove the node, logging (not returning) any cleanup error
    Teardown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name; prefixes node names and keys the credential file
    pub profile: String,
    pub kubernetes_version: String,
    /// Node image; derived from the Kubernetes version when unset
    pub image: Option<String>,
    /// Host address the API server port is published on
    pub host_ip: String,
    pub host_port: u16,
    pub pod_subnet: String,
    pub service_subnet: String,
    /// kubeadm bootstrap token, `[a-z0-9]{6}.[a-z0-9]{16}`
    pub token: String,
    pub ipv6: bool,
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub envs: BTreeMap<String, String>,
    pub extra_mounts: Vec<Mount>,
    pub extra_port_mappings: Vec<PortMapping>,
    pub pull_timeout: Duration,
    /// Deadline applied to every command run inside the node, if any
    pub command_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    /// Where credentials are written; `~/.kube` when unset
    pub kubeconfig_dir: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            profile: "p1".into(),
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.into(),
            image: None,
            host_ip: "127.0.0.1".into(),
            host_port: 0,
            pod_subnet: DEFAULT_POD_SUBNET.into(),
            service_subnet: DEFAULT_SERVICE_SUBNET.into(),
            token: generate_token(),
            ipv6: false,
            cpus: None,
            memory: None,
            envs: BTreeMap::new(),
            extra_mounts: Vec::new(),
            extra_port_mappings: Vec::new(),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            command_timeout: None,
            failure_policy: FailurePolicy::default(),
            kubeconfig_dir: None,
        }
    }
}

fn token_format() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"^[a-z0-9]{6}\.[a-z0-9]{16}$").expect("valid token regex"))
}

/// Random kubeadm bootstrap token
pub fn generate_token() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}.{}", &hex[..6], &hex[6..22])
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Configured image, or `kindest/node:<version tag>`
    pub fn node_image(&self) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!("{}:{}", DEFAULT_NODE_IMAGE_REPO, derive_tag(&self.kubernetes_version)),
        }
    }

    /// Checks needed to find an existing cluster's nodes and credentials
    pub fn validate_profile(&self) -> crate::Result<()> {
        if self.profile.is_empty() {
            return Err(crate::Error::Config("profile cannot be empty".into()));
        }
        Ok(())
    }

    /// Checks needed to create a cluster
    pub fn validate(&self) -> crate::Result<()> {
        self.validate_profile()?;
        parse_version(&self.kubernetes_version)?;
        if self.host_ip.is_empty() {
            return Err(crate::Error::Config("host_ip cannot be empty".into()));
        }
        if self.host_port == 0 {
            return Err(crate::Error::Config("host_port must be set".into()));
        }
        if self.pod_subnet.is_empty() || self.service_subnet.is_empty() {
            return Err(crate::Error::Config("pod and service subnets cannot be empty".into()));
        }
        if !token_format().is_match(&self.token) {
            return Err(crate::Error::Config(format!(
                "token {:?} does not match [a-z0-9]{{6}}.[a-z0-9]{{16}}",
                self.token
            )));
        }
        if self.pull_timeout.is_zero() {
            return Err(crate::Error::Config("pull_timeout must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config.profile = profile.into();
        self
    }

    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.config.kubernetes_version = version.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = Some(image.into());
        self
    }

    pub fn host_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.host_ip = ip.into();
        self
    }

    pub fn host_port(mut self, port: u16) -> Self {
        self.config.host_port = port;
        self
    }

    pub fn pod_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.config.pod_subnet = subnet.into();
        self
    }

    pub fn service_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.config.service_subnet = subnet.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = token.into();
        self
    }

    pub fn ipv6(mut self, enabled: bool) -> Self {
        self.config.ipv6 = enabled;
        self
    }

    pub fn cpus(mut self, cpus: impl Into<String>) -> Self {
        self.config.cpus = Some(cpus.into());
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.config.memory = Some(memory.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.envs.insert(key.into(), value.into());
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.config.extra_mounts.push(mount);
        self
    }

    pub fn port_mapping(mut self, mapping: PortMapping) -> Self {
        self.config.extra_port_mappings.push(mapping);
        self
    }

    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.config.pull_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = Some(timeout);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn kubeconfig_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.kubeconfig_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> ClusterConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<ClusterConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
