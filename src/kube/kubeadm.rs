//! kubeadm configuration rendering and cluster initialization

use super::ADMIN_KUBECONFIG_PATH;
use crate::command::{Command, Runner};
use crate::{Error, Result};
use semver::Version;
use serde::Serialize;
use std::fmt;

/// Where the rendered kubeadm configuration is written inside the node
pub const KUBEADM_CONFIG_PATH: &str = "/kic/kubeadm.conf";

/// Port the API server binds to inside the node
pub const API_BIND_PORT: u16 = 6443;

/// kubeadm configuration API versions, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTemplate {
    V1Alpha2,
    V1Alpha3,
    V1Beta1,
    V1Beta2,
}

impl ConfigTemplate {
    pub fn api_version(&self) -> &'static str {
        match self {
            ConfigTemplate::V1Alpha2 => "kubeadm.k8s.io/v1alpha2",
            ConfigTemplate::V1Alpha3 => "kubeadm.k8s.io/v1alpha3",
            ConfigTemplate::V1Beta1 => "kubeadm.k8s.io/v1beta1",
            ConfigTemplate::V1Beta2 => "kubeadm.k8s.io/v1beta2",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            ConfigTemplate::V1Alpha2 => include_str!("templates/v1alpha2.yaml"),
            ConfigTemplate::V1Alpha3 => include_str!("templates/v1alpha3.yaml"),
            ConfigTemplate::V1Beta1 => include_str!("templates/v1beta1.yaml"),
            ConfigTemplate::V1Beta2 => include_str!("templates/v1beta2.yaml"),
        }
    }
}

impl fmt::Display for ConfigTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_version())
    }
}

/// Upper bounds (exclusive) checked in order; the first one above the
/// requested version wins.
const TEMPLATE_THRESHOLDS: [((u64, u64, u64), ConfigTemplate); 3] = [
    ((1, 12, 0), ConfigTemplate::V1Alpha2),
    ((1, 13, 0), ConfigTemplate::V1Alpha3),
    ((1, 15, 0), ConfigTemplate::V1Beta1),
];

const NEWEST_TEMPLATE: ConfigTemplate = ConfigTemplate::V1Beta2;

/// Parse a Kubernetes version such as `v1.15.0`, `1.15` or `v1.16.0-beta.1+abc`
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let version = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let parsed = Version::parse(version).or_else(|err| {
        // accept `major.minor` by padding the patch component
        let split = version.find(['-', '+']).unwrap_or(version.len());
        let (core, rest) = version.split_at(split);
        if core.split('.').count() == 2 {
            Version::parse(&format!("{}.0{}", core, rest))
        } else {
            Err(err)
        }
    });
    parsed.map_err(|e| Error::Config(format!("invalid kubernetes version {:?}: {}", raw, e)))
}

/// Pick the kubeadm config template for a Kubernetes version
pub fn select_template(kubernetes_version: &str) -> Result<ConfigTemplate> {
    let parsed = parse_version(kubernetes_version)?;
    // pre-release and build suffixes are ignored: v1.15.0-rc.1 gates like v1.15.0
    let version = Version::new(parsed.major, parsed.minor, parsed.patch);

    for ((major, minor, patch), template) in TEMPLATE_THRESHOLDS {
        if version < Version::new(major, minor, patch) {
            return Ok(template);
        }
    }
    Ok(NEWEST_TEMPLATE)
}

/// Image tag for a Kubernetes version; `+` is not allowed in tags
pub fn derive_tag(kubernetes_version: &str) -> String {
    kubernetes_version.replace('+', "_")
}

/// Values substituted into the kubeadm config template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapConfig {
    pub cluster_name: String,
    pub kubernetes_version: String,
    /// `host:port` other nodes and clients use to reach the API server
    pub control_plane_endpoint: String,
    pub api_bind_port: u16,
    /// Host-side address added to the serving certificate
    pub api_server_address: String,
    pub control_plane: bool,
    pub node_address: String,
    pub token: String,
    pub pod_subnet: String,
    pub service_subnet: String,
    pub ipv6: bool,
    /// Image-tag form of `kubernetes_version`, filled by [`derive`](Self::derive)
    pub derived_tag: Option<String>,
}

impl BootstrapConfig {
    /// Fill derived fields that are still unset
    pub fn derive(&mut self) {
        if self.derived_tag.is_none() {
            self.derived_tag = Some(derive_tag(&self.kubernetes_version));
        }
    }
}

/// Render the kubeadm config for `config`'s Kubernetes version
pub fn render_config(config: &BootstrapConfig) -> Result<String> {
    let template = select_template(&config.kubernetes_version)?;
    tracing::debug!(%template, version = %config.kubernetes_version, "selected kubeadm config template");

    let mut data = config.clone();
    data.derive();
    let context = tera::Context::from_serialize(&data)?;
    Ok(tera::Tera::one_off(template.source(), &context, false)?)
}

/// Run `kubeadm init` against the config at `config_path`, returning its output
pub fn init(runner: &dyn Runner, config_path: &str) -> Result<String> {
    let cmd = Command::new("kubeadm").args([
        "init".to_string(),
        // preflight errors are expected as we are running in a container
        "--ignore-preflight-errors=all".to_string(),
        format!("--config={}", config_path),
        "--skip-token-print".to_string(),
        "--v=6".to_string(),
    ]);
    runner.combined_output(&cmd, None)
}

/// Allow workloads on the control plane node
pub fn remove_master_taint(runner: &dyn Runner) -> Result<()> {
    let cmd = Command::new("kubectl").args([
        format!("--kubeconfig={}", ADMIN_KUBECONFIG_PATH),
        "taint".to_string(),
        "nodes".to_string(),
        "--all".to_string(),
        "node-role.kubernetes.io/master-".to_string(),
    ]);
    runner.run(&cmd)
}
