//! kic CLI

use clap::{Parser, Subcommand};
use kic::oci::Docker;
use kic::{Bootstrapper, ClusterConfig, FailurePolicy, LocalRunner};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "kic")]
#[command(about = "Run a single-node Kubernetes cluster in a container", long_about = None)]
struct Cli {
    /// Cluster profile
    #[arg(short, long, global = true, default_value = "p1")]
    profile: String,
    /// Container engine CLI
    #[arg(long, global = true, default_value = "docker")]
    engine: String,
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and bootstrap a cluster
    Start {
        /// Kubernetes version (default: v1.15.0)
        #[arg(long, default_value = kic::config::DEFAULT_KUBERNETES_VERSION)]
        kubernetes_version: String,
        /// Node image (default: kindest/node:<version>)
        #[arg(long)]
        image: Option<String>,
        /// Host address the API server is published on
        #[arg(long, default_value = "127.0.0.1")]
        host_ip: String,
        /// Host port for the API server (default: a free port)
        #[arg(long)]
        host_port: Option<u16>,
        #[arg(long, default_value = kic::config::DEFAULT_POD_SUBNET)]
        pod_subnet: String,
        /// CPU limit for the node container
        #[arg(long)]
        cpus: Option<String>,
        /// Memory limit for the node container
        #[arg(long)]
        memory: Option<String>,
        /// Seconds to wait for the image pull (default: 180)
        #[arg(long, default_value = "180")]
        pull_timeout: u64,
        /// Remove the node if bootstrapping fails
        #[arg(long)]
        teardown_on_failure: bool,
    },
    /// Pause the cluster's nodes
    Stop,
    /// Delete the cluster's nodes and credentials
    Delete,
    /// List the cluster's nodes
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Start {
            kubernetes_version,
            image,
            host_ip,
            host_port,
            pod_subnet,
            cpus,
            memory,
            pull_timeout,
            teardown_on_failure,
        } => {
            let mut builder = ClusterConfig::builder()
                .profile(&cli.profile)
                .kubernetes_version(kubernetes_version)
                .host_ip(&host_ip)
                .host_port(match host_port {
                    Some(port) => port,
                    None => free_port(&host_ip)?,
                })
                .pod_subnet(pod_subnet)
                .pull_timeout(Duration::from_secs(pull_timeout));
            if let Some(image) = image {
                builder = builder.image(image);
            }
            if let Some(cpus) = cpus {
                builder = builder.cpus(cpus);
            }
            if let Some(memory) = memory {
                builder = builder.memory(memory);
            }
            if teardown_on_failure {
                builder = builder.failure_policy(FailurePolicy::Teardown);
            }
            let config = builder.build();
            cmd_start(Bootstrapper::with_runtime(config, runtime(&cli.engine))?)?;
        }
        Commands::Stop => {
            cmd_stop(profile_bootstrapper(&cli.profile, &cli.engine)?)?;
        }
        Commands::Delete => {
            cmd_delete(profile_bootstrapper(&cli.profile, &cli.engine)?)?;
        }
        Commands::List => {
            cmd_list(profile_bootstrapper(&cli.profile, &cli.engine)?)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn runtime(engine: &str) -> Arc<Docker> {
    Arc::new(Docker::with_runner(engine, Arc::new(LocalRunner::new())))
}

/// Bootstrapper for commands that only act on an existing profile
fn profile_bootstrapper(profile: &str, engine: &str) -> kic::Result<Bootstrapper> {
    let config = ClusterConfig::builder().profile(profile).build();
    Bootstrapper::for_profile(config, runtime(engine))
}

/// Let the OS pick an unused port on `host_ip`
fn free_port(host_ip: &str) -> std::io::Result<u16> {
    let listener = TcpListener::bind((host_ip, 0))?;
    Ok(listener.local_addr()?.port())
}

fn cmd_start(bootstrapper: Bootstrapper) -> Result<(), Box<dyn std::error::Error>> {
    let config = bootstrapper.config();
    println!("Creating cluster '{}'...", config.profile);
    println!("  Image: {}", config.node_image());
    println!("  API server: {}:{}", config.host_ip, config.host_port);

    let cluster = bootstrapper.up()?;

    println!("\nCluster '{}' is ready.", config.profile);
    println!("export KUBECONFIG={}", cluster.kubeconfig.display());
    Ok(())
}

fn cmd_stop(bootstrapper: Bootstrapper) -> Result<(), Box<dyn std::error::Error>> {
    bootstrapper.stop()?;
    println!("Cluster '{}' stopped.", bootstrapper.config().profile);
    Ok(())
}

fn cmd_delete(bootstrapper: Bootstrapper) -> Result<(), Box<dyn std::error::Error>> {
    bootstrapper.down()?;
    println!("Cluster '{}' deleted.", bootstrapper.config().profile);
    Ok(())
}

fn cmd_list(bootstrapper: Bootstrapper) -> Result<(), Box<dyn std::error::Error>> {
    let nodes = bootstrapper.nodes()?;
    if nodes.is_empty() {
        println!("No nodes found for profile '{}'.", bootstrapper.config().profile);
    } else {
        for node in nodes {
            println!("{}", node);
        }
    }
    Ok(())
}
