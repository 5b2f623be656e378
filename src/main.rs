//! # fleetsync
//!
//! Command-line entry point: watches one console collection and prints each
//! refreshed page as a JSON line.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use fleetsync::{
    config::{AppConfig, ConfigLoader},
    list_view::{ListViewOptions, ListViewState, ResourceListView},
    query::{Label, ListQuery},
    resources::{self, DeviceFilters, EventCriteria, ResourceKind},
    telemetry,
    transport::HttpTransport,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleetsync")]
#[command(about = "Poll paginated fleet management collections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep a collection refreshed and print every page update
    Watch(WatchArgs),
}

#[derive(clap::Args)]
struct WatchArgs {
    resource: WatchedResource,

    /// Name filter; the involved object's name for events
    #[arg(long)]
    name: Option<String>,

    /// Label selector entry as key=value (devices only)
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<Label>,

    /// Kind of the object owning the events (events only)
    #[arg(long)]
    kind: Option<ResourceKind>,

    /// Page to walk to before watching
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Print the first result and exit
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchedResource {
    Fleets,
    Devices,
    EnrollmentRequests,
    Repositories,
    Events,
}

fn parse_label(raw: &str) -> Result<Label, String> {
    Label::parse(raw).ok_or_else(|| format!("invalid label '{raw}', expected key=value"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    match cli.command {
        Commands::Watch(args) => watch(&config, args, shutdown).await,
    }
}

async fn watch(config: &AppConfig, args: WatchArgs, shutdown: CancellationToken) -> Result<()> {
    let base_url = config.api_base_url()?;
    let transport = Arc::new(HttpTransport::new(&base_url).context("building API client")?);

    let mut options = ListViewOptions::from_config(&config.poll);
    let query = build_query(config, &args, &mut options);
    info!(resource = query.resource(), page = args.page, "Watching collection");

    let view = ResourceListView::<Value>::open(transport, query, options);
    let result = run_watch(&view, &args, &shutdown).await;
    view.close();
    result
}

fn build_query(config: &AppConfig, args: &WatchArgs, options: &mut ListViewOptions) -> ListQuery {
    let name = args.name.as_deref();
    match args.resource {
        WatchedResource::Fleets => resources::fleets_query(name, true),
        WatchedResource::Devices => resources::devices_query(&DeviceFilters {
            name_or_alias: args.name.clone(),
            labels: args.labels.clone(),
            ..DeviceFilters::default()
        }),
        WatchedResource::EnrollmentRequests => resources::pending_enrollment_requests_query(),
        WatchedResource::Repositories => resources::repositories_query(name),
        WatchedResource::Events => {
            options.poll_interval = resources::events_poll_interval(args.kind, &config.poll);
            let criteria = EventCriteria {
                kind: args.kind,
                name: args.name.clone(),
                event_type: None,
            };
            resources::events_query(&criteria, config.poll.event_page_size)
        }
    }
}

async fn run_watch(
    view: &ResourceListView<Value>,
    args: &WatchArgs,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut updates = view.subscribe();
    let mut last_printed = None;

    loop {
        let settled = {
            let state = updates.borrow_and_update();
            state.descriptor == view.descriptor() && !state.is_loading && !state.is_refreshing
        };

        if settled {
            let snapshot = view.snapshot();
            if snapshot.current_page < args.page {
                if snapshot.last_reachable_page > snapshot.current_page {
                    view.go_to_page(snapshot.current_page + 1)?;
                    continue;
                }
                if let Some(err) = &snapshot.error {
                    bail!("failed to reach page {}: {err}", args.page);
                }
                bail!(
                    "page {} does not exist; the collection ends at page {}",
                    args.page,
                    snapshot.current_page
                );
            }

            if snapshot.last_updated != last_printed || snapshot.error.is_some() {
                last_printed = snapshot.last_updated;
                report(&snapshot)?;
                if args.once {
                    return match &snapshot.error {
                        Some(err) => Err(anyhow!("{err}")),
                        None => Ok(()),
                    };
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

fn report(snapshot: &ListViewState<Value>) -> Result<()> {
    if let Some(err) = &snapshot.error {
        warn!(error = %err, "Collection refresh failed; showing previous results");
    } else {
        tracing::debug!(
            page = snapshot.current_page,
            items = snapshot.items().len(),
            estimated = snapshot.estimated_item_count,
            "Collection updated"
        );
    }

    let line = json!({
        "page": snapshot.current_page,
        "estimatedItemCount": snapshot.estimated_item_count,
        "hasNextPage": snapshot.has_next_page,
        "lastUpdated": snapshot.last_updated,
        "items": snapshot.items(),
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}
