//! Bootstrap integration tests
//!
//! The first tests drive the full bootstrap against an in-memory engine. The
//! `#[ignore]`d ones need a working docker daemon and pull a real node image.

use kic::command::{OutputSink, Stdin};
use kic::oci::RunOptions;
use kic::{Bootstrapper, ClusterConfig, Command, ContainerRuntime, ErrorKind, FailurePolicy, Runner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

const ADMIN_CONF: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: Zm9v
    server: https://172.17.0.2:6443
  name: p1
contexts:
- context:
    cluster: p1
    user: kubernetes-admin
  name: kubernetes-admin@p1
";

const CNI_MANIFEST: &str = "# would you kindly template this file
kind: ConfigMap
data:
  net-conf.json: '{\"Network\": \"{{ .PodSubnet }}\"}'
";

#[derive(Debug, Clone)]
struct Exec {
    line: String,
    stdin: Option<String>,
}

/// Commands run inside the fake node, answered by command line
#[derive(Default)]
struct FakeNode {
    execs: Mutex<Vec<Exec>>,
    /// command line prefix that exits non-zero
    failing: Option<&'static str>,
}

impl Runner for FakeNode {
    fn combined_output_to(&self, cmd: &Command, out: &mut dyn OutputSink, stdin: Stdin<'_>) -> kic::Result<()> {
        let stdin = match stdin {
            Some(input) => {
                let mut text = String::new();
                input.read_to_string(&mut text)?;
                Some(text)
            }
            None => None,
        };
        let line = cmd.to_string();
        self.execs.lock().push(Exec {
            line: line.clone(),
            stdin,
        });

        if self.failing.is_some_and(|prefix| line.starts_with(prefix)) {
            return Err(kic::Error::Execution {
                command: line,
                output: "boom".into(),
                reason: "exit status: 1".into(),
            });
        }
        let reply = match line.as_str() {
            "cat /etc/kubernetes/admin.conf" => ADMIN_CONF,
            "cat /kind/manifests/default-cni.yaml" => CNI_MANIFEST,
            _ => "",
        };
        out.write_all(reply.as_bytes())?;
        Ok(())
    }
}

/// Container engine keeping containers in memory
struct FakeEngine {
    node: Arc<FakeNode>,
    containers: Mutex<HashMap<String, (String, RunOptions)>>,
    pulls: Mutex<Vec<(String, Duration)>>,
}

impl FakeEngine {
    fn new(node: FakeNode) -> Self {
        Self {
            node: Arc::new(node),
            containers: Mutex::new(HashMap::new()),
            pulls: Mutex::new(Vec::new()),
        }
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

impl ContainerRuntime for FakeEngine {
    fn create_container(&self, image: &str, options: &RunOptions) -> kic::Result<()> {
        let name = arg_after(&options.run_args, "--name").unwrap_or_default().to_string();
        self.containers
            .lock()
            .insert(name, (image.to_string(), options.clone()));
        Ok(())
    }

    fn inspect(&self, _name: &str, _format: &str) -> kic::Result<Vec<String>> {
        Ok(vec!["172.17.0.2,".to_string()])
    }

    fn pull_if_not_present(&self, image: &str, _force: bool, timeout: Duration) -> kic::Result<()> {
        self.pulls.lock().push((image.to_string(), timeout));
        Ok(())
    }

    fn userns_remap(&self) -> kic::Result<bool> {
        Ok(false)
    }

    fn list(&self, label: &str, _format: &str) -> kic::Result<Vec<String>> {
        let containers = self.containers.lock();
        let mut lines: Vec<String> = containers
            .iter()
            .filter(|(_, (_, options))| options.run_args.iter().any(|a| a == label))
            .map(|(name, _)| format!("{}\tp1", name))
            .collect();
        lines.sort();
        Ok(lines)
    }

    fn remove(&self, name: &str) -> kic::Result<()> {
        self.containers.lock().remove(name);
        Ok(())
    }

    fn pause(&self, _name: &str) -> kic::Result<()> {
        Ok(())
    }

    fn node_runner(&self, _name: &str) -> Arc<dyn Runner> {
        self.node.clone()
    }
}

fn config(dir: &tempfile::TempDir) -> ClusterConfig {
    ClusterConfig::builder()
        .profile("p1")
        .kubernetes_version("v1.15.0")
        .host_ip("127.0.0.1")
        .host_port(40000)
        .kubeconfig_dir(dir.path())
        .build()
}

#[test]
fn test_bootstrap_single_node_cluster() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::new(FakeNode::default()));
    let bootstrapper = Bootstrapper::with_runtime(config(&tmp), engine.clone()).unwrap();

    let cluster = bootstrapper.up().unwrap();

    // one container, published on the requested host port
    let containers = engine.containers.lock();
    assert_eq!(containers.len(), 1);
    let (image, options) = &containers["p1control-plane"];
    assert_eq!(image, "kindest/node:v1.15.0");
    assert_eq!(options.port_mappings[0].to_publish_arg(), "127.0.0.1:40000:6443/tcp");
    drop(containers);

    assert_eq!(
        engine.pulls.lock().as_slice(),
        [("kindest/node:v1.15.0".to_string(), Duration::from_secs(180))]
    );

    let execs = engine.node.execs.lock().clone();
    let count = |prefix: &str| execs.iter().filter(|e| e.line.starts_with(prefix)).count();
    assert_eq!(count("kubeadm init"), 1);
    assert_eq!(count("kubectl --kubeconfig=/etc/kubernetes/admin.conf taint"), 1);
    assert_eq!(count("kubectl create"), 1);

    let rendered = execs
        .iter()
        .find(|e| e.line == "cp /dev/stdin /kic/kubeadm.conf")
        .and_then(|e| e.stdin.clone())
        .unwrap();
    assert!(rendered.contains("apiVersion: kubeadm.k8s.io/v1beta2"));

    let applied = execs
        .iter()
        .find(|e| e.line.starts_with("kubectl create"))
        .and_then(|e| e.stdin.clone())
        .unwrap();
    assert!(applied.contains("10.244.0.0/16"));

    let credentials = std::fs::read_to_string(&cluster.kubeconfig).unwrap();
    assert!(credentials.contains("    server: https://127.0.0.1:40000\n"));
    assert!(credentials.contains("  name: kubernetes-admin@p1\n"));
    assert_eq!(bootstrapper.nodes().unwrap(), ["p1control-plane"]);

    bootstrapper.down().unwrap();
    assert!(bootstrapper.nodes().unwrap().is_empty());
    assert!(!cluster.kubeconfig.exists());
}

#[test]
fn test_failed_network_install_tears_down() {
    let tmp = tempfile::TempDir::new().unwrap();
    let node = FakeNode {
        failing: Some("kubectl create"),
        ..Default::default()
    };
    let engine = Arc::new(FakeEngine::new(node));
    let config = ClusterConfig {
        failure_policy: FailurePolicy::Teardown,
        ..config(&tmp)
    };
    let bootstrapper = Bootstrapper::with_runtime(config, engine.clone()).unwrap();

    let err = bootstrapper.up().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.output(), Some("boom"));
    assert!(engine.containers.lock().is_empty());
    assert!(!tmp.path().join("kic-config-p1").exists());
}

#[test]
#[ignore] // Run manually: cargo test --test bootstrap -- --ignored (requires docker)
fn test_docker_cluster_lifecycle() {
    let tmp = tempfile::TempDir::new().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ClusterConfig::builder()
        .profile("kic-e2e")
        .host_port(port)
        .kubeconfig_dir(tmp.path())
        .failure_policy(FailurePolicy::Teardown)
        .build_validated()
        .unwrap();
    let bootstrapper = Bootstrapper::new(config).unwrap();

    let cluster = bootstrapper.up().unwrap();
    assert!(!cluster.address.ipv4.is_empty());

    let credentials = std::fs::read_to_string(&cluster.kubeconfig).unwrap();
    assert!(credentials.contains(&format!("server: https://127.0.0.1:{}", port)));
    assert_eq!(bootstrapper.nodes().unwrap(), ["kic-e2econtrol-plane"]);

    bootstrapper.stop().unwrap();
    bootstrapper.down().unwrap();
    assert!(bootstrapper.nodes().unwrap().is_empty());
}
