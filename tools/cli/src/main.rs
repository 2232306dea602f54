//! SpotSync CLI - Command line interface for the offline-first spot cache.
//!
//! Every command works against the local cache database. When the server
//! answers a reachability ping, reads and writes go to it directly and the
//! cache is refreshed along the way; otherwise changes are queued for the
//! next `spotsync sync`.

mod config;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use spotsync_common::{
    Entity, EntityId, Page, PageSource, Record, Spot, SpotDraft, SpotFilter, SpotPatch, SyncStatus,
    Visit, VisitDraft, VisitFilter,
};
use spotsync_remote::{HttpGateway, RemoteGateway};
use spotsync_storage::{LocalStore, SqliteStore};
use spotsync_sync::{
    ConnectivityMonitor, ConnectivityProbe, OfflineRepository, PhotoAttachment, PhotoRepository,
    SyncOrchestrator, SyncOutcome, SyncReport, SyncService, SyncState,
};

use crate::config::{default_config_path, AppConfig};

/// How often `sync --watch` pings the server.
const PROBE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "spotsync")]
#[command(about = "SpotSync - Offline-first spot and visit journal")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/spotsync/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local cache database, overrides the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Server base URL, overrides the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Work against the local cache only.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage spots.
    #[command(subcommand)]
    Spot(SpotCommand),

    /// Manage visits.
    #[command(subcommand)]
    Visit(VisitCommand),

    /// Attach photos and inspect the upload queue.
    #[command(subcommand)]
    Photo(PhotoCommand),

    /// Reconcile the local cache with the server.
    Sync {
        /// Keep running: sync on reconnect, on the configured period and on
        /// local changes.
        #[arg(short, long)]
        watch: bool,
    },

    /// Show pending changes and the last sync.
    Status,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SpotCommand {
    /// Create a spot.
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        /// Rating from 1 to 5.
        #[arg(short, long)]
        rating: Option<u8>,
    },

    /// List spots.
    List {
        /// Substring of name or description.
        #[arg(short, long)]
        search: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(long)]
        min_rating: Option<u8>,

        #[arg(short, long, default_value_t = 1)]
        page: u32,

        #[arg(short, long)]
        limit: Option<u32>,

        /// Read the local cache even when online.
        #[arg(long)]
        local: bool,
    },

    /// Show one spot.
    Show {
        #[arg(allow_negative_numbers = true)]
        id: EntityId,
    },

    /// Change fields of a spot.
    Edit {
        #[arg(allow_negative_numbers = true)]
        id: EntityId,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(short, long)]
        rating: Option<u8>,
    },

    /// Delete a spot.
    Rm {
        #[arg(allow_negative_numbers = true)]
        id: EntityId,
    },
}

#[derive(Subcommand)]
enum VisitCommand {
    /// Record a visit to a spot.
    Add {
        /// Spot id, temporary ids included.
        #[arg(short, long, allow_negative_numbers = true)]
        spot: EntityId,

        /// Visit time as RFC 3339 (default: now).
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        #[arg(short, long)]
        note: Option<String>,

        #[arg(short, long)]
        rating: Option<u8>,
    },

    /// List visits, optionally for one spot.
    List {
        #[arg(short, long, allow_negative_numbers = true)]
        spot: Option<EntityId>,

        #[arg(short, long, default_value_t = 1)]
        page: u32,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Delete a visit.
    Rm {
        #[arg(allow_negative_numbers = true)]
        id: EntityId,
    },
}

#[derive(Subcommand)]
enum PhotoCommand {
    /// Attach a photo file to a spot.
    Attach {
        #[arg(allow_negative_numbers = true)]
        spot: EntityId,

        file: PathBuf,

        /// Use as the spot's main photo.
        #[arg(short, long)]
        main: bool,
    },

    /// List photos waiting for upload.
    Pending,
}

/// Opened cache, gateway and connectivity shared by all commands.
struct App {
    config: AppConfig,
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: ConnectivityMonitor,
    offline: bool,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(default_config_path);
        let mut config = AppConfig::load(&config_path)?;
        if let Some(db) = &cli.db {
            config.database_path = db.clone();
        }
        if let Some(server) = &cli.server {
            config.gateway.base_url = server.clone();
        }
        debug!("Using config {}", config_path.display());

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory {}", parent.display())
            })?;
        }
        let store = SqliteStore::open(&config.database_path).with_context(|| {
            format!("Failed to open cache {}", config.database_path.display())
        })?;
        let gateway = HttpGateway::new(&config.gateway).context("Invalid server configuration")?;
        let gateway: Arc<dyn RemoteGateway> = Arc::new(gateway);

        let connectivity = ConnectivityMonitor::offline();
        if cli.offline {
            info!("Offline mode, using the local cache only");
        } else {
            let online = ConnectivityProbe::new(gateway.clone(), connectivity.clone(), PROBE_PERIOD)
                .check()
                .await;
            info!(
                "Server {} is {}",
                config.gateway.base_url,
                if online { "reachable" } else { "unreachable" }
            );
        }

        Ok(Self {
            config,
            store: Arc::new(store),
            gateway,
            connectivity,
            offline: cli.offline,
        })
    }

    fn repository<E: Entity>(&self) -> OfflineRepository<E> {
        OfflineRepository::new(
            self.store.clone(),
            self.gateway.clone(),
            self.connectivity.clone(),
        )
    }

    fn photos(&self) -> PhotoRepository {
        PhotoRepository::new(
            self.store.clone(),
            self.gateway.clone(),
            self.connectivity.clone(),
        )
    }

    fn orchestrator(&self) -> Result<SyncOrchestrator> {
        SyncOrchestrator::new(
            self.store.clone(),
            self.gateway.clone(),
            self.connectivity.clone(),
            self.config.sync.clone(),
        )
        .context("Failed to load sync state")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "spotsync", &mut std::io::stdout());
        return Ok(());
    }

    let app = App::open(&cli).await?;

    match cli.command {
        Commands::Spot(command) => cmd_spot(&app, command).await,
        Commands::Visit(command) => cmd_visit(&app, command).await,
        Commands::Photo(command) => cmd_photo(&app, command).await,
        Commands::Sync { watch: false } => cmd_sync(&app).await,
        Commands::Sync { watch: true } => cmd_sync_watch(&app).await,
        Commands::Status => cmd_status(&app),
        Commands::Completions { .. } => Ok(()),
    }
}

async fn cmd_spot(app: &App, command: SpotCommand) -> Result<()> {
    let spots = app.repository::<Spot>();

    match command {
        SpotCommand::Add {
            name,
            lat,
            lon,
            description,
            category,
            rating,
        } => {
            let mut draft = SpotDraft::new(name, lat, lon);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(category) = category {
                draft = draft.with_category(category);
            }
            if let Some(rating) = rating {
                draft = draft.with_rating(rating);
            }
            let record = spots.create(draft).await.context("Failed to create spot")?;
            println!("Spot created: {}", record.id());
            if record.sync_status.is_pending() {
                println!("  Queued for the next sync.");
            }
        }

        SpotCommand::List {
            search,
            category,
            min_rating,
            page,
            limit,
            local,
        } => {
            let mut filter = SpotFilter {
                search,
                category,
                min_rating,
                ..Default::default()
            }
            .page(page);
            if let Some(limit) = limit {
                filter = filter.limit(limit);
            }

            let result = if local {
                spots.list_local(&filter)
            } else {
                spots.list(&filter).await
            };
            let result = result.context("Failed to list spots")?;

            print_page_header("spots", &result);
            for record in &result.items {
                print_spot_line(record);
            }
        }

        SpotCommand::Show { id } => {
            let record = spots.get(id).await.context("Failed to load spot")?;
            let spot = &record.entity;
            println!("Spot {}:", spot.id);
            println!("  Name: {}", spot.name);
            if let Some(description) = &spot.description {
                println!("  Description: {}", description);
            }
            println!("  Location: {:.6}, {:.6}", spot.latitude, spot.longitude);
            if let Some(category) = &spot.category {
                println!("  Category: {}", category);
            }
            if let Some(rating) = spot.rating {
                println!("  Rating: {}/5", rating);
            }
            if let Some(url) = &spot.main_photo_url {
                println!("  Main photo: {}", url);
            }
            println!("  Status: {}", record.sync_status);

            let visits = app
                .repository::<Visit>()
                .list(&VisitFilter::for_spot(id))
                .await
                .context("Failed to list visits")?;
            if !visits.items.is_empty() {
                println!("  Visits:");
                for record in &visits.items {
                    print_visit_line(record);
                }
            }
        }

        SpotCommand::Edit {
            id,
            name,
            lat,
            lon,
            description,
            category,
            rating,
        } => {
            let patch = SpotPatch {
                name,
                description,
                latitude: lat,
                longitude: lon,
                category,
                rating,
            };
            if patch == SpotPatch::default() {
                anyhow::bail!("Nothing to change. Pass at least one field.");
            }
            let record = spots.update(id, patch).await.context("Failed to update spot")?;
            println!("Spot updated: {} ({})", record.id(), record.sync_status);
        }

        SpotCommand::Rm { id } => {
            spots.delete(id).await.context("Failed to delete spot")?;
            println!("Spot removed: {}", id);
        }
    }

    Ok(())
}

async fn cmd_visit(app: &App, command: VisitCommand) -> Result<()> {
    let visits = app.repository::<Visit>();

    match command {
        VisitCommand::Add {
            spot,
            at,
            note,
            rating,
        } => {
            let draft = VisitDraft {
                spot_id: spot,
                visited_at: at.unwrap_or_else(Utc::now),
                note,
                rating,
            };
            let record = visits.create(draft).await.context("Failed to record visit")?;
            println!("Visit recorded: {} (spot {})", record.id(), record.entity.spot_id);
            if record.sync_status.is_pending() {
                println!("  Queued for the next sync.");
            }
        }

        VisitCommand::List { spot, page, limit } => {
            let mut filter = VisitFilter {
                spot_id: spot,
                page,
                ..Default::default()
            };
            if let Some(limit) = limit {
                filter.limit = limit;
            }
            let result = visits.list(&filter).await.context("Failed to list visits")?;

            print_page_header("visits", &result);
            for record in &result.items {
                print_visit_line(record);
            }
        }

        VisitCommand::Rm { id } => {
            visits.delete(id).await.context("Failed to delete visit")?;
            println!("Visit removed: {}", id);
        }
    }

    Ok(())
}

async fn cmd_photo(app: &App, command: PhotoCommand) -> Result<()> {
    let photos = app.photos();

    match command {
        PhotoCommand::Attach { spot, file, main } => {
            let attachment = photos
                .attach(spot, &file, main)
                .await
                .context("Failed to attach photo")?;
            match attachment {
                PhotoAttachment::Uploaded => println!("Photo uploaded: {}", file.display()),
                PhotoAttachment::Queued(photo) => {
                    println!("Photo queued for spot {}: {}", photo.owner_id, file.display())
                }
            }
        }

        PhotoCommand::Pending => {
            let pending = photos.pending().context("Failed to read photo queue")?;
            if pending.is_empty() {
                println!("No photos waiting for upload.");
            } else {
                println!("Photos waiting for upload:");
                for photo in pending {
                    println!(
                        "  #{} spot {} {}{} (queued {})",
                        photo.id,
                        photo.owner_id,
                        photo.file_path.display(),
                        if photo.is_main { " [main]" } else { "" },
                        photo.queued_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }

    Ok(())
}

/// Run one sync and print its report.
async fn cmd_sync(app: &App) -> Result<()> {
    let orchestrator = app.orchestrator()?;

    match orchestrator.run_sync().await {
        SyncOutcome::Completed(report) => {
            print_report(&report);
            Ok(())
        }
        SyncOutcome::Skipped(reason) => {
            println!("Sync skipped: {:?}", reason);
            Ok(())
        }
        SyncOutcome::Failed(message) => anyhow::bail!("Sync failed: {}", message),
    }
}

/// Keep a sync service running until interrupted.
async fn cmd_sync_watch(app: &App) -> Result<()> {
    let orchestrator = Arc::new(app.orchestrator()?);
    let mut progress = orchestrator.progress();

    let probe = (!app.offline).then(|| {
        ConnectivityProbe::new(app.gateway.clone(), app.connectivity.clone(), PROBE_PERIOD).spawn()
    });
    let service = SyncService::spawn(orchestrator.clone());
    let outcome = service.request_sync().await?;
    debug!("Initial sync: {:?}", outcome);

    println!("Watching for changes, press Ctrl-C to stop.");
    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = progress.borrow_and_update().clone();
                match &snapshot.state {
                    SyncState::Syncing => println!("Syncing..."),
                    SyncState::Success(_) | SyncState::Error(_) => {
                        println!("{} ({} pending)", snapshot.state, snapshot.pending.total());
                        if let Some(report) = &snapshot.last_report {
                            for failure in &report.failures {
                                println!("  {}", failure);
                            }
                        }
                    }
                    SyncState::Idle => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.shutdown().await;
    if let Some(probe) = probe {
        probe.abort();
    }
    Ok(())
}

fn cmd_status(app: &App) -> Result<()> {
    let snapshot = app.orchestrator()?.snapshot();

    println!("SpotSync status:");
    println!("  Server: {}", app.config.gateway.base_url);
    println!(
        "  Connectivity: {}",
        if app.connectivity.is_online() { "online" } else { "offline" }
    );
    match snapshot.last_sync_at {
        Some(at) => println!("  Last sync: {}", at.to_rfc3339()),
        None => println!("  Last sync: never"),
    }
    println!("  Pending changes:");
    for (family, count) in &snapshot.pending.per_family {
        println!("    {}: {}", family, count);
    }
    println!("    photos: {}", snapshot.pending.photos);

    Ok(())
}

fn print_page_header<T>(what: &str, page: &Page<T>) {
    let source = match page.source {
        PageSource::Remote => "server",
        PageSource::Local => "local cache",
    };
    match page.total {
        Some(total) => println!("Page {} of {} ({} total, from {}):", page.page, what, total, source),
        None => println!("Page {} of {} (from {}):", page.page, what, source),
    }
    if page.items.is_empty() {
        println!("  No {} found.", what);
    }
}

fn print_spot_line(record: &Record<Spot>) {
    let spot = &record.entity;
    let rating = spot.rating.map(|r| format!(" {}/5", r)).unwrap_or_default();
    println!(
        "  {:>6}  {}{}{}",
        spot.id,
        spot.name,
        rating,
        status_marker(record.sync_status)
    );
}

fn print_visit_line(record: &Record<Visit>) {
    let visit = &record.entity;
    println!(
        "  {:>6}  spot {} on {}{}{}",
        visit.id,
        visit.spot_id,
        visit.visited_at.format("%Y-%m-%d"),
        visit.note.as_deref().map(|n| format!(": {}", n)).unwrap_or_default(),
        status_marker(record.sync_status)
    );
}

fn status_marker(status: SyncStatus) -> String {
    if status.is_pending() {
        format!(" [{}]", status)
    } else {
        String::new()
    }
}

fn print_report(report: &SyncReport) {
    println!("Sync completed:");
    println!("  Downloaded: {}", report.downloaded);
    println!(
        "  Uploaded: {} created, {} updated, {} deleted, {} photos",
        report.created, report.updated, report.deleted, report.photos_uploaded
    );
    if report.photos_dropped > 0 {
        println!("  Dropped photos with missing files: {}", report.photos_dropped);
    }
    for remap in &report.remaps {
        println!("  {} {} is now {}", remap.family, remap.from, remap.to);
    }
    if !report.is_clean() {
        println!("  Failures (kept for the next sync):");
        for failure in &report.failures {
            println!("    {}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_negative_ids_parse() {
        let cli = Cli::try_parse_from(["spotsync", "--offline", "spot", "show", "-3"]).unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Spot(SpotCommand::Show { id }) => assert_eq!(id, EntityId::Pending(3)),
            _ => panic!("expected spot show"),
        }
    }

    #[test]
    fn test_visit_add_time() {
        let cli = Cli::try_parse_from([
            "spotsync",
            "visit",
            "add",
            "--spot",
            "12",
            "--at",
            "2024-05-01T10:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Commands::Visit(VisitCommand::Add { spot, at, .. }) => {
                assert_eq!(spot, EntityId::Committed(12));
                assert_eq!(at.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");
            }
            _ => panic!("expected visit add"),
        }
    }

    #[test]
    fn test_status_marker() {
        assert_eq!(status_marker(SyncStatus::Synced), "");
        assert_eq!(status_marker(SyncStatus::PendingUpdate), " [pending_update]");
    }
}
