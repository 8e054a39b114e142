//! Admin credentials: extraction from the node and persistence on the host

use super::ADMIN_KUBECONFIG_PATH;
use crate::command::{Command, Runner};
use crate::error::Context;
use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn server_line() -> &'static Regex {
    static SERVER: OnceLock<Regex> = OnceLock::new();
    SERVER.get_or_init(|| Regex::new(r"^(\s+server:) https://.*:\d+$").expect("valid server regex"))
}

/// `host:port`, bracketing IPv6 hosts
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Point every cluster `server:` entry at `https://host:port`.
///
/// Only lines of the form `<indent>server: https://<anything>:<digits>` are
/// touched; everything else, line endings included, is kept byte for byte.
pub fn rewrite_server_address(content: &str, host: &str, port: u16) -> String {
    let replacement = format!("${{1}} https://{}", join_host_port(host, port));
    let mut rewritten = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];
        let body = server_line().replace(body, replacement.as_str());
        rewritten.push_str(&body);
        rewritten.push_str(ending);
    }
    rewritten
}

/// Read the admin kubeconfig from the node, rewritten to reach the API
/// server through the host address
pub fn generate_kubeconfig(runner: &dyn Runner, host: &str, port: u16) -> Result<String> {
    let content = runner
        .combined_output(&Command::new("cat").arg(ADMIN_KUBECONFIG_PATH), None)
        .context("failed to get kubeconfig from node")?;
    Ok(rewrite_server_address(&content, host, port))
}

/// `~/.kube`, where credentials are persisted by default
pub fn default_kubeconfig_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".kube"))
        .ok_or_else(|| Error::Config("could not determine home directory".into()))
}

/// File holding the credentials for `profile` under `dir`
pub fn kubeconfig_path(dir: &Path, profile: &str) -> PathBuf {
    dir.join(format!("kic-config-{}", profile))
}

/// Write credentials to `path`, creating parent directories as needed.
///
/// The file is readable by the owner only; created directories get 0755.
pub fn write_kubeconfig(content: &str, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir(dir).with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let mut file = open_private(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote kubeconfig");
    Ok(())
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}
