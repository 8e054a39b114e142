//! Pod network installation

use super::ADMIN_KUBECONFIG_PATH;
use crate::command::{Command, Runner};
use crate::error::Context;
use crate::Result;
use regex::Regex;
use std::sync::OnceLock;

/// Default CNI manifest shipped in the node image
pub const CNI_MANIFEST_PATH: &str = "/kind/manifests/default-cni.yaml";

/// Manifests containing this line expect the pod subnet to be filled in
const TEMPLATE_MARKER: &str = "would you kindly template this file";

fn pod_subnet_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{-?\s*\.PodSubnet\s*-?\}\}").expect("valid placeholder regex"))
}

/// Fill the pod subnet into a manifest that asks for it; others pass through untouched
pub fn render_manifest(manifest: &str, pod_subnet: &str) -> String {
    if !manifest.contains(TEMPLATE_MARKER) {
        return manifest.to_string();
    }
    pod_subnet_placeholder()
        .replace_all(manifest, regex::NoExpand(pod_subnet))
        .into_owned()
}

/// Apply the node image's default CNI manifest to the cluster
pub fn install_overlay_network(runner: &dyn Runner, pod_subnet: &str) -> Result<()> {
    let manifest = runner
        .combined_output(&Command::new("cat").arg(CNI_MANIFEST_PATH), None)
        .context("failed to read CNI manifest")?;

    let manifest = render_manifest(&manifest, pod_subnet);

    let apply = Command::new("kubectl").args([
        "create".to_string(),
        format!("--kubeconfig={}", ADMIN_KUBECONFIG_PATH),
        "-f".to_string(),
        "-".to_string(),
    ]);
    let mut input = manifest.as_bytes();
    runner
        .combined_output(&apply, Some(&mut input))
        .context("failed to apply overlay network")?;
    Ok(())
}
