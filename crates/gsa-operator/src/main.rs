//! GCP service account operator

use std::sync::Arc;

use anyhow::Context as _;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kube::Client;

use gsa_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use gsa_controller::Context;
use gsa_iam::auth::{default_token_source, discover_project};
use gsa_iam::{GcpIamClient, IamClient};
use gsa_operator::controller_runner::run_service_account_controller;
use gsa_operator::crds::{crd_manifests, ensure_crds_installed};

/// Manages GCP service accounts, their role bindings, and key secrets from Kubernetes
#[derive(Parser, Debug)]
#[command(name = "gsa-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Project new service accounts are created in; discovered from the metadata server if unset
    #[arg(long, env = "GCP_PROJECT", global = true)]
    project: Option<String>,

    /// Apply role bindings without checking GcpNamespaceRestrictions
    #[arg(long, env = "DISABLE_RESTRICTIONS", global = true)]
    disable_restrictions: bool,

    /// Log line format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json, global = true)]
    log_format: LogFormatArg,

    /// Install or update the CRDs on startup
    #[arg(long, env = "INSTALL_CRDS", default_value_t = true, action = ArgAction::Set, global = true)]
    install_crds: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig {
        service_name: "gsa-operator".to_string(),
        format: args.log_format.into(),
    })?;

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    if args.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let http = GcpIamClient::http_client()?;
    let project = match args.project {
        Some(project) => project,
        None => discover_project(&http)
            .await
            .context("no --project given and the metadata server did not provide one")?,
    };

    let iam: Arc<dyn IamClient> =
        Arc::new(GcpIamClient::new(http.clone(), default_token_source(http)));

    if args.disable_restrictions {
        tracing::warn!("namespace restrictions disabled, all role bindings will be applied");
    }
    tracing::info!(project = %project, "starting controllers");

    let ctx = Context::builder(client.clone(), iam, project)
        .disable_restrictions(args.disable_restrictions)
        .build();

    run_service_account_controller(client, Arc::new(ctx)).await;

    tracing::info!("controller stopped");
    Ok(())
}
