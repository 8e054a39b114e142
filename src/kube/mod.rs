//! Kubernetes bootstrap actions run inside a node
//!
//! Each action takes a [`Runner`](crate::command::Runner) for the node and
//! shells out to the tools shipped in the node image (`kubeadm`, `kubectl`,
//! `cat`). None of them know about containers.

pub mod cni;
pub mod kubeadm;
pub mod kubeconfig;

pub use cni::install_overlay_network;
pub use kubeadm::{derive_tag, parse_version, render_config, select_template, BootstrapConfig, ConfigTemplate};
pub use kubeconfig::{default_kubeconfig_dir, generate_kubeconfig, kubeconfig_path, rewrite_server_address, write_kubeconfig};

/// Admin credentials written by `kubeadm init`
pub const ADMIN_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";
