//! mutation-sync - run optimistic mutations from the command line
//!
//! Usage:
//!   mutation-sync [--backend memory|http] [--log-format text|json] <command>
//!
//! Every command works on a fresh cache: it loads page 1 of the resource,
//! performs the action through the synchronizer and prints the cached views
//! as JSON on stdout. Logs go to stderr.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mutation_sync::SyncConfig;
use mutation_sync::domain::{
    Entity, EntityId, FundRequestStatus, IgpStatus, ListQuery, ResourceCatalog,
};
use mutation_sync::error::TransportError;
use mutation_sync::infrastructure::{
    CacheStore, FaultyTransport, HttpTransport, InMemoryCacheStore, InMemoryTransport,
    RngProvider, ScriptedWrite, Transport,
};
use mutation_sync::sync::{MutationOutcome, MutationRequest, SyncOptions, SyncRegistry, Synchronizer};

#[derive(Parser)]
#[command(name = "mutation-sync")]
#[command(about = "Optimistic mutations against a cached resource")]
struct Cli {
    /// Where mutations are sent
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// In-process backend seeded with sample data
    Memory,
    /// REST API at SYNC_API_BASE_URL
    Http,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one page of a resource
    List {
        resource: String,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 10)]
        limit: u64,
    },
    /// Create an entity from a JSON object
    Create { resource: String, payload: String },
    /// Merge a JSON object into an entity
    Update {
        resource: String,
        id: String,
        payload: String,
    },
    /// Delete an entity
    Delete { resource: String, id: String },
    /// Move a fund request or IGP to another status
    Transition {
        resource: String,
        id: String,
        from: String,
        to: String,
    },
    /// Run a create, a failing update and a delete against the memory backend
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = SyncConfig::from_env().context("invalid configuration")?;
    tracing::info!(backend = ?cli.backend, rollback = %config.rollback_policy, "Starting mutation-sync");

    let backend = InMemoryTransport::new();
    seed_sample_data(&backend).await;

    let backend_kind = if matches!(cli.command, Commands::Demo) {
        Backend::Memory
    } else {
        cli.backend
    };
    let transport = build_transport(backend_kind, &config, backend.clone());
    let cache = Arc::new(InMemoryCacheStore::new());
    let registry = SyncRegistry::new(
        &ResourceCatalog::council(),
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        transport,
        &SyncOptions::from_config(&config),
    );

    match cli.command {
        Commands::List {
            resource,
            page,
            limit,
        } => {
            let synchronizer = synchronizer(&registry, &resource)?;
            synchronizer.fetch_page(&ListQuery::new(page, limit)).await?;
        }
        Commands::Create { resource, payload } => {
            let synchronizer = load(&registry, &resource).await?;
            let outcome = synchronizer
                .mutate(MutationRequest::create(parse_payload(&payload)?))
                .await;
            report(&outcome)?;
        }
        Commands::Update {
            resource,
            id,
            payload,
        } => {
            let synchronizer = load(&registry, &resource).await?;
            let outcome = synchronizer
                .mutate(MutationRequest::update(EntityId::new(id), parse_payload(&payload)?))
                .await;
            report(&outcome)?;
        }
        Commands::Delete { resource, id } => {
            let synchronizer = load(&registry, &resource).await?;
            let outcome = synchronizer.mutate(MutationRequest::delete(EntityId::new(id))).await;
            report(&outcome)?;
        }
        Commands::Transition {
            resource,
            id,
            from,
            to,
        } => {
            let synchronizer = load(&registry, &resource).await?;
            let id = EntityId::new(id);
            let entity = match resource.as_str() {
                "fund-requests" => {
                    synchronizer
                        .transition(id, parse_status::<FundRequestStatus>(&from)?, parse_status(&to)?)
                        .await?
                }
                "igps" => {
                    synchronizer
                        .transition(id, parse_status::<IgpStatus>(&from)?, parse_status(&to)?)
                        .await?
                }
                other => bail!("{other} has no approval workflow"),
            };
            tracing::info!(id = %entity.id, status = ?entity.field("status"), "Transitioned");
        }
        Commands::Demo => run_demo(&registry, &backend).await?,
    }

    print_views(cache.as_ref())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "mutation_sync=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn build_transport(
    backend: Backend,
    config: &SyncConfig,
    memory: InMemoryTransport,
) -> Arc<dyn Transport> {
    match backend {
        Backend::Memory => with_faults(memory, config),
        Backend::Http => with_faults(
            HttpTransport::new(Some(config.api_base_url.clone()), config.timeout),
            config,
        ),
    }
}

fn with_faults<T: Transport + 'static>(transport: T, config: &SyncConfig) -> Arc<dyn Transport> {
    if config.faults.is_enabled() {
        tracing::info!(faults = ?config.faults, "Fault injection enabled");
        Arc::new(FaultyTransport::new(
            transport,
            config.faults.clone(),
            RngProvider::from_seed(config.rng_seed),
        ))
    } else {
        Arc::new(transport)
    }
}

fn synchronizer<'a>(registry: &'a SyncRegistry, resource: &str) -> anyhow::Result<&'a Synchronizer> {
    registry.get(resource).with_context(|| {
        format!(
            "unknown resource {resource}; expected one of {}",
            registry.names().join(", ")
        )
    })
}

async fn load<'a>(registry: &'a SyncRegistry, resource: &str) -> anyhow::Result<&'a Synchronizer> {
    let synchronizer = synchronizer(registry, resource)?;
    synchronizer.fetch_page(&ListQuery::default()).await?;
    Ok(synchronizer)
}

fn parse_payload(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("payload is not valid JSON")? {
        Value::Object(fields) => Ok(fields),
        other => bail!("payload must be a JSON object, got {other}"),
    }
}

fn parse_status<S: std::str::FromStr<Err = String>>(raw: &str) -> anyhow::Result<S> {
    raw.parse().map_err(anyhow::Error::msg)
}

fn report(outcome: &MutationOutcome) -> anyhow::Result<()> {
    let result = match &outcome.result {
        Ok(Some(entity)) => json!({ "entity": entity }),
        Ok(None) => json!({ "entity": null }),
        Err(error) => json!({ "error": error.to_string() }),
    };
    let summary = json!({
        "mutationId": outcome.mutation_id.to_string(),
        "operation": outcome.operation.to_string(),
        "provisionalId": outcome.provisional_id.as_ref().map(ToString::to_string),
        "phases": outcome.phases,
        "optimistic": outcome.optimistic_keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "reconciled": outcome.reconciled_keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "restored": outcome.restored_keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "result": result,
    });
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_views(cache: &dyn CacheStore) -> anyhow::Result<()> {
    let views: BTreeMap<String, Value> = cache
        .entries()
        .into_iter()
        .map(|(key, view)| (key.to_string(), view.to_value()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

// =============================================================================
// Sample data
// =============================================================================

async fn seed_sample_data(backend: &InMemoryTransport) {
    let samples = [
        (
            "igp",
            vec![
                json!({"id": "igp-2", "projectTitle": "Used book fair", "status": "approved"}),
                json!({"id": "igp-1", "projectTitle": "Bake sale", "status": "pending"}),
            ],
        ),
        (
            "fund-request",
            vec![json!({"id": "fr-1", "purpose": "Sports fest", "amount": 5000, "status": "pending"})],
        ),
        (
            "locker",
            vec![
                json!({"id": "locker-1", "lockerNumber": "A-01", "status": "available"}),
                json!({"id": "locker-2", "lockerNumber": "A-02", "status": "occupied"}),
            ],
        ),
        (
            "water-vendo",
            vec![json!({"id": "vendo-1", "location": "Main lobby"})],
        ),
    ];
    for (endpoint, rows) in samples {
        backend
            .seed(endpoint, rows.into_iter().filter_map(Entity::from_value).collect())
            .await;
    }
}

async fn run_demo(registry: &SyncRegistry, backend: &InMemoryTransport) -> anyhow::Result<()> {
    let igps = synchronizer(registry, "igps")?;
    igps.fetch_page(&ListQuery::default()).await?;
    igps.fetch_next_segment(&ListQuery::default()).await?;

    tracing::info!("Creating an IGP");
    let outcome = igps
        .mutate(MutationRequest::create(parse_payload(
            r#"{"projectTitle": "Plant sale", "status": "pending"}"#,
        )?))
        .await;
    report(&outcome)?;

    tracing::info!("Updating an IGP while the backend times out");
    backend
        .script_next_write(ScriptedWrite::Fail(TransportError::Timeout(5000)))
        .await;
    let outcome = igps
        .mutate(MutationRequest::update(
            EntityId::new("igp-1"),
            parse_payload(r#"{"projectTitle": "Bake sale (moved)"}"#)?,
        ))
        .await;
    report(&outcome)?;

    tracing::info!("Deleting an IGP");
    let outcome = igps.mutate(MutationRequest::delete(EntityId::new("igp-2"))).await;
    report(&outcome)?;
    Ok(())
}
