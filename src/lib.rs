//! kic: Kubernetes in a container
//!
//! A Rust library for running a single-node Kubernetes cluster inside a
//! privileged container. The container is created through a
//! [`ContainerRuntime`](oci::ContainerRuntime), commands inside it run through
//! a [`Runner`](command::Runner), and the [`Bootstrapper`] drives `kubeadm`,
//! the pod network and the admin credentials until the cluster is usable
//! from the host.
//!
//! # Example
//!
//! ```no_run
//! use kic::{Bootstrapper, ClusterConfig};
//!
//! let config = ClusterConfig::builder()
//!     .profile("dev")
//!     .kubernetes_version("v1.15.0")
//!     .host_port(40000)
//!     .build_validated()?;
//!
//! let cluster = Bootstrapper::new(config)?.up()?;
//! println!("export KUBECONFIG={}", cluster.kubeconfig.display());
//! # Ok::<(), kic::Error>(())
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod kube;
pub mod node;
pub mod oci;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use command::{Command, LocalRunner, NodeRunner, Runner};
pub use config::{ClusterConfig, FailurePolicy};
pub use error::{Error, ErrorKind, Result};
pub use node::{NodeAddress, NodeHandle, NodeRole, NodeSpec, NodeState};
pub use oci::{ContainerRuntime, Docker};
pub use orchestrator::{Bootstrapper, Cluster, Phase};
