//! EC2 Machine Provider
//!
//! Runs the cloud provider with health, readiness and metrics endpoints, and
//! periodically reconciles the set of managed instances into Machines.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ec2_machine_provider::domain::ports::{AmiProviderRef, ObjectStoreRef};
use ec2_machine_provider::providers::CatalogFile;
use ec2_machine_provider::{
    AwsCloudProvider, CloudProvider, Collaborators, Error, InMemoryInstanceProvider,
    InMemoryObjectStore, KubeObjectStore, NodeNameConvention, NodeTemplate, NodeTemplateSpec,
    ProviderMetrics, Provisioner, ProvisionerSpec, Result, Settings, StaticAmiProvider,
    StaticCatalog,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// EC2 Machine Provider - cloud provider adapter for the node autoscaler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Cluster the provider launches instances for
    #[arg(long, env = "CLUSTER_NAME", default_value = "")]
    cluster_name: String,

    /// Machine naming convention (resource-name, ip-name)
    #[arg(long, env = "NODE_NAME_CONVENTION", default_value = "ip-name")]
    node_name_convention: NodeNameConvention,

    /// Scheme prefix of provider identity strings
    #[arg(long, env = "PROVIDER_ID_SCHEME", default_value = "aws")]
    provider_id_scheme: String,

    /// YAML settings file, overriding the flags above
    #[arg(long, env = "SETTINGS_FILE")]
    settings_file: Option<String>,

    /// YAML instance type and image catalog
    #[arg(long, env = "CATALOG_FILE")]
    catalog_file: String,

    /// Seconds between instance reconciliation passes
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "60")]
    resync_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings> {
        if let Some(path) = &self.settings_file {
            return Settings::from_file(path);
        }
        let settings = Settings {
            cluster_name: self.cluster_name.clone(),
            node_name_convention: self.node_name_convention,
            provider_id_scheme: self.provider_id_scheme.clone(),
            ..Default::default()
        };
        settings.validate()?;
        Ok(settings)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = Arc::new(args.settings()?);

    info!("Starting EC2 Machine Provider");
    info!("  Version: {}", ec2_machine_provider::VERSION);
    info!("  Cluster: {}", settings.cluster_name);
    info!("  Node names: {}", settings.node_name_convention);
    info!("  Standalone mode: {}", args.standalone);

    let catalog_file = CatalogFile::from_file(&args.catalog_file)?;
    let amis: AmiProviderRef = Arc::new(StaticAmiProvider::new(catalog_file.images));
    let catalog = Arc::new(StaticCatalog::new(catalog_file.instance_types)?);
    let instances = Arc::new(InMemoryInstanceProvider::new(settings.clone(), amis.clone()));

    let store: ObjectStoreRef = if args.standalone {
        Arc::new(standalone_store())
    } else {
        let client = kube::Client::try_default().await?;
        Arc::new(KubeObjectStore::new(client))
    };

    let metrics = Arc::new(ProviderMetrics::new()?);
    let provider = Arc::new(
        AwsCloudProvider::new(
            settings.clone(),
            Collaborators {
                store,
                catalog,
                instances,
                amis,
            },
        )
        .with_metrics(metrics.clone()),
    );
    info!("Cloud provider {} initialized", provider.name());

    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_provider = provider.clone();
    let health_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_provider, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_shutdown.cancel();
    });

    run_resync_loop(
        provider,
        Duration::from_secs(args.resync_interval_secs.max(1)),
        shutdown,
    )
    .await;

    info!("Provider shutdown complete");
    Ok(())
}

/// Object store seeded with a default provisioner and node template
fn standalone_store() -> InMemoryObjectStore {
    let store = InMemoryObjectStore::new();
    store.insert_node_template(NodeTemplate::new("default", NodeTemplateSpec::default()));
    store.insert_provisioner(Provisioner::new(
        "default",
        ProvisionerSpec {
            provider_ref: Some(ec2_machine_provider::crd::ProviderRef {
                name: "default".into(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ));
    store
}

// =============================================================================
// Resync Loop
// =============================================================================

async fn run_resync_loop(provider: Arc<AwsCloudProvider>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match provider.list(&shutdown).await {
            Ok(machines) => info!(machines = machines.len(), "Reconciled managed instances"),
            Err(e) if matches!(e.root(), Error::Cancelled) => break,
            Err(e) => warn!(error = %e, "Failed listing machines"),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(
    addr: &str,
    provider: Arc<AwsCloudProvider>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let provider = provider.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let provider = provider.clone();
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => match provider.liveness_probe(&req) {
                            Ok(()) => (StatusCode::OK, "ok".to_string()),
                            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        "/readyz" => (StatusCode::OK, "ok".to_string()),
                        _ => (StatusCode::NOT_FOUND, "not found".to_string()),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    metrics: Arc<ProviderMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::TEXT_FORMAT;

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = if req.uri().path() != "/metrics" {
                        let mut response = Response::new(Body::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match metrics.encode() {
                            Ok(buffer) => {
                                let mut response = Response::new(Body::from(buffer));
                                response
                                    .headers_mut()
                                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                                response
                            }
                            Err(e) => {
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
