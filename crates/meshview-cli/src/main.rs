//! meshview - service mesh configuration and graph inspection
//!
//! Startup runs in a fixed order: crypto provider, configuration, telemetry,
//! cluster client factory, business context. Each command then runs against
//! a per-caller layer built from that context.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use meshview_business::{
    BusinessContext, CallerIdentity, IstioConfigCriteria, KubeClientFactory, Layer,
};
use meshview_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use meshview_common::MeshConfig;
use meshview_graph::telemetry::DestinationLabels;
use meshview_graph::{GraphOptions, GraphRequest, TelemetryNormalizer};

/// meshview - inspect Istio configuration and graph requests
#[derive(Parser, Debug)]
#[command(name = "meshview", version, about, long_about = None)]
struct Cli {
    /// Mesh configuration file (YAML)
    #[arg(long, env = "MESHVIEW_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List Istio configuration in a namespace
    ConfigList {
        /// Namespace to aggregate
        #[arg(short, long)]
        namespace: String,

        /// Comma-separated resource kinds (all when omitted)
        #[arg(long, default_value = "")]
        object_types: String,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Show one Istio object and the caller's permissions on it
    ConfigDetails {
        #[command(flatten)]
        object: ObjectArgs,

        /// Object name
        name: String,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Create an Istio object from a JSON body
    Create {
        #[command(flatten)]
        object: ObjectArgs,

        /// File holding the JSON body
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Apply a JSON merge patch to an Istio object
    Update {
        #[command(flatten)]
        object: ObjectArgs,

        /// Object name
        name: String,

        /// File holding the merge patch
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Delete an Istio object
    Delete {
        #[command(flatten)]
        object: ObjectArgs,

        /// Object name
        name: String,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Report create/update/delete permissions for the new-config kinds
    Permissions {
        /// Namespaces to review
        #[arg(required = true, value_delimiter = ',')]
        namespaces: Vec<String>,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Resolve graph request parameters into graph options
    GraphOptions {
        /// Node-detail namespace
        #[arg(long)]
        namespace: Option<String>,

        /// Node-detail app
        #[arg(long)]
        app: Option<String>,

        /// Node-detail service
        #[arg(long)]
        service: Option<String>,

        /// Node-detail app version
        #[arg(long)]
        app_version: Option<String>,

        /// Node-detail workload
        #[arg(long)]
        workload: Option<String>,

        /// Query parameter as key=value, repeatable
        #[arg(short, long = "param", value_parser = parse_query_pair)]
        params: Vec<(String, String)>,

        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Apply destination repairs to one telemetry edge
    NormalizeEdge {
        /// Source workload namespace
        #[arg(long, default_value = meshview_graph::UNKNOWN)]
        source_namespace: String,

        /// Source workload
        #[arg(long, default_value = meshview_graph::UNKNOWN)]
        source_workload: String,

        /// Destination labels as JSON
        destination: String,
    },
}

/// Identity to impersonate; the service account is used when absent
#[derive(Args, Debug)]
struct CallerArgs {
    /// User to act as
    #[arg(long = "as")]
    user: Option<String>,

    /// Group to act as, repeatable
    #[arg(long = "as-group", requires = "user")]
    groups: Vec<String>,
}

#[derive(Args, Debug)]
struct ObjectArgs {
    /// Namespace of the object
    #[arg(short, long)]
    namespace: String,

    /// Resource kind, e.g. virtualservices
    #[arg(short = 't', long)]
    object_type: String,

    /// Adapter or template subtype
    #[arg(long, default_value = "")]
    subtype: String,
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got [{}]", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // aws-lc-rs backs every TLS connection to the API server
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The application cannot reach the API server without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let config = MeshConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    init_telemetry(TelemetryConfig {
        log_format: if cli.pretty_logs {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        },
        ..TelemetryConfig::for_service("meshview")
    })?;
    debug!(?config, "configuration loaded");

    // Edge repair needs nothing from the cluster
    if let Commands::NormalizeEdge {
        source_namespace,
        source_workload,
        destination,
    } = &cli.command
    {
        let dest: DestinationLabels =
            serde_json::from_str(destination).context("invalid destination labels")?;
        let (dest, updated) = TelemetryNormalizer::new(&config).handle_destination(
            source_namespace,
            source_workload,
            dest,
        );
        return print_json(&serde_json::json!({ "destination": dest, "updated": updated }));
    }

    let factory = KubeClientFactory::infer()
        .await
        .context("failed to build cluster client configuration")?;
    let ctx = BusinessContext::init(config, Arc::new(factory), None)?;
    info!("meshview started");

    run(&ctx, cli.command).await
}

async fn run(ctx: &BusinessContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::ConfigList {
            namespace,
            object_types,
            caller,
        } => {
            let layer = layer_for(ctx, caller)?;
            let criteria = IstioConfigCriteria::with_object_types(namespace, &object_types);
            let list = layer.istio_config.get_istio_config_list(&criteria).await?;
            print_json(&list)
        }
        Commands::ConfigDetails {
            object,
            name,
            caller,
        } => {
            let layer = layer_for(ctx, caller)?;
            let details = layer
                .istio_config
                .get_istio_config_details(
                    &object.namespace,
                    &object.object_type,
                    &object.subtype,
                    &name,
                )
                .await?;
            print_json(&details)
        }
        Commands::Create {
            object,
            file,
            caller,
        } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let layer = layer_for(ctx, caller)?;
            let details = layer
                .istio_config
                .create_istio_config_detail(
                    &object.namespace,
                    &object.object_type,
                    &object.subtype,
                    &body,
                )
                .await?;
            print_json(&details)
        }
        Commands::Update {
            object,
            name,
            file,
            caller,
        } => {
            let patch = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let layer = layer_for(ctx, caller)?;
            let details = layer
                .istio_config
                .update_istio_config_detail(
                    &object.namespace,
                    &object.object_type,
                    &object.subtype,
                    &name,
                    &patch,
                )
                .await?;
            print_json(&details)
        }
        Commands::Delete {
            object,
            name,
            caller,
        } => {
            let layer = layer_for(ctx, caller)?;
            layer
                .istio_config
                .delete_istio_config_detail(
                    &object.namespace,
                    &object.object_type,
                    &object.subtype,
                    &name,
                )
                .await?;
            info!(namespace = %object.namespace, object_type = %object.object_type, %name, "deleted");
            Ok(())
        }
        Commands::Permissions { namespaces, caller } => {
            let layer = layer_for(ctx, caller)?;
            let permissions = layer
                .istio_config
                .get_istio_config_permissions(&namespaces)
                .await;
            print_json(&permissions)
        }
        Commands::GraphOptions {
            namespace,
            app,
            service,
            app_version,
            workload,
            params,
            caller,
        } => {
            let layer = layer_for(ctx, caller)?;
            let mut request = GraphRequest::from_query(params);
            request.path.namespace = namespace;
            request.path.app = app;
            request.path.service = service;
            request.path.version = app_version;
            request.path.workload = workload;

            let options = GraphOptions::resolve(&request, &layer.namespace, ctx.config()).await?;
            print_json(&serde_json::json!({
                "graphKind": options.graph_kind(),
                "options": options,
            }))
        }
        Commands::NormalizeEdge { .. } => Ok(()),
    }
}

fn layer_for(ctx: &BusinessContext, caller: CallerArgs) -> anyhow::Result<Layer> {
    let layer = match caller.user {
        Some(username) => ctx.layer(&CallerIdentity {
            username,
            groups: caller.groups,
        })?,
        None => ctx.unauthenticated_layer()?,
    };
    Ok(layer)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
