//! Batch jobs for the fire event/episode pipeline
//!
//! One binary, four subcommands mirroring the pipeline stages: `cluster`
//! raw detections into events, `consolidate` duplicate events, aggregate
//! `episodes`, and `backfill` spatial-index cells. Exit status is non-zero
//! only on unrecoverable I/O or configuration errors; skipped rows and
//! pairs never fail a run.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use fire_events_core::{
    aggregate_episodes, backfill_cells, consolidate_events, run_clustering_job, AdminMode,
    AssignmentStrategy, BackfillConfig, ClusteringConfig, ConfigError, ConsolidationConfig,
    Detection, EpisodeConfig, EventStatus, GeeConfig, GeometryMode, PersistenceMode, RankKey,
    ScoreWeights, Store,
};

/// Fire event and episode aggregation batch jobs
#[derive(Parser, Debug)]
#[command(name = "fire-events-jobs")]
#[command(about = "Satellite fire detection clustering and aggregation jobs", long_about = None)]
struct Cli {
    /// Path to the canonical store snapshot
    #[arg(long, default_value = "store.json")]
    store: PathBuf,

    /// Compute and log without committing any change
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cluster raw detections into events
    Cluster {
        /// JSON file with the detection feed batch
        #[arg(long)]
        detections: PathBuf,

        /// Minimum confidence score to keep a detection
        #[arg(long, default_value_t = 0.5)]
        confidence_cutoff: f64,

        /// DBSCAN epsilon in kilometers
        #[arg(long, default_value_t = 1.0)]
        epsilon_km: f64,

        /// DBSCAN density threshold
        #[arg(long, default_value_t = 2)]
        min_samples: usize,

        /// Temporal gap in days that splits a spatial cluster
        #[arg(long, default_value_t = 3.0)]
        temporal_gap_days: f64,

        /// Significance floor on summed FRP
        #[arg(long, default_value_t = 10.0)]
        min_total_frp: f64,

        /// Significance floor on detection count
        #[arg(long, default_value_t = 2)]
        min_detection_count: u64,

        /// Clustering version to pull spatial/temporal parameters from
        /// (defaults to the registry's active version when one exists)
        #[arg(long)]
        version: Option<String>,
    },

    /// Merge duplicate active events
    Consolidate {
        /// Maximum centroid distance in meters
        #[arg(long, default_value_t = 1000.0)]
        distance_m: f64,

        /// Days of slack between date ranges
        #[arg(long, default_value_t = 5)]
        day_buffer: i64,
    },

    /// Aggregate events into episodes and rank GEE candidates
    Episodes {
        /// Event states folded by the pass (comma separated)
        #[arg(long, value_delimiter = ',', default_value = "active,monitoring,extinct")]
        input_status: Vec<String>,

        /// Maximum event-to-episode distance in meters
        #[arg(long, default_value_t = 7000.0)]
        distance_m: f64,

        /// Days of slack between date ranges
        #[arg(long, default_value_t = 12)]
        days_buffer: i64,

        /// Administrative gate: off, soft or strict
        #[arg(long, default_value = "soft")]
        admin_mode: String,

        /// Distance geometry: centroid, buffer_distance or hull_union
        #[arg(long, default_value = "centroid")]
        geometry_mode: String,

        /// Buffer in meters for the non-centroid geometry modes
        #[arg(long, default_value_t = 2000.0)]
        geometry_buffer_m: f64,

        /// Assignment strategy: closest_distance, max_overlap_time or best_score
        #[arg(long, default_value = "closest_distance")]
        strategy: String,

        /// Best-score weights
        #[arg(long, default_value_t = 0.4)]
        weight_distance: f64,
        #[arg(long, default_value_t = 0.3)]
        weight_overlap: f64,
        #[arg(long, default_value_t = 0.2)]
        weight_intensity: f64,
        #[arg(long, default_value_t = 0.1)]
        weight_size: f64,

        /// Persistence: full_rebuild or incremental
        #[arg(long, default_value = "full_rebuild")]
        mode: String,

        /// Monitoring window in days before an episode goes extinct
        #[arg(long, default_value_t = 15)]
        monitoring_window_days: i64,

        /// Only consider events starting at/after this RFC3339 instant
        #[arg(long)]
        from: Option<String>,

        /// Only consider events starting at/before this RFC3339 instant
        #[arg(long)]
        to: Option<String>,

        /// GEE candidate floors and ranking
        #[arg(long, default_value_t = 6.0)]
        gee_min_duration_hours: f64,
        #[arg(long, default_value_t = 5)]
        gee_min_detections: u64,
        #[arg(long)]
        gee_min_frp_sum: Option<f64>,
        #[arg(long)]
        gee_min_frp_max: Option<f64>,
        #[arg(long, default_value = "frp_sum")]
        gee_rank_key: String,
        #[arg(long)]
        gee_max_candidates: Option<usize>,

        /// Version stamp recorded on produced episodes
        #[arg(long)]
        version: Option<String>,
    },

    /// Backfill spatial-index cells over events and detections
    Backfill {
        /// Grid resolution (1..=24)
        #[arg(long, default_value_t = 12)]
        resolution: u8,

        /// Number of parallel workers
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Rows claimed per batch
        #[arg(long, default_value_t = 500)]
        batch_size: usize,

        /// Stop after roughly this many rows
        #[arg(long)]
        max_rows: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = if cli.store.exists() {
        Store::load(&cli.store)?
    } else {
        info!(path = %cli.store.display(), "no snapshot found, starting empty");
        Store::new()
    };

    match cli.command {
        Command::Cluster {
            detections,
            confidence_cutoff,
            epsilon_km,
            min_samples,
            temporal_gap_days,
            min_total_frp,
            min_detection_count,
            version,
        } => {
            let mut config = ClusteringConfig {
                confidence_cutoff,
                spatial_epsilon_km: epsilon_km,
                min_samples,
                temporal_gap_days,
                min_total_frp,
                min_detection_count,
            }
            .clamped();
            // A named version overrides the spatial/temporal parameters;
            // with no name the active registry version (if any) applies
            if let Some(name) = &version {
                config = config.with_version(store.versions.get(name)?);
            } else if !store.versions.is_empty() {
                config = config.with_version(store.versions.active()?);
            }

            let contents = fs::read_to_string(&detections)?;
            let batch: Vec<Detection> = serde_json::from_str(&contents)?;
            let summary = run_clustering_job(&mut store, batch, &config, cli.dry_run);
            summary.log();
            println!("{summary}");
        }

        Command::Consolidate {
            distance_m,
            day_buffer,
        } => {
            let config = ConsolidationConfig {
                distance_threshold_m: distance_m,
                day_buffer,
            }
            .clamped();
            let summary = consolidate_events(&mut store, &config, cli.dry_run);
            summary.log();
            println!("{summary}");
        }

        Command::Episodes {
            input_status,
            distance_m,
            days_buffer,
            admin_mode,
            geometry_mode,
            geometry_buffer_m,
            strategy,
            weight_distance,
            weight_overlap,
            weight_intensity,
            weight_size,
            mode,
            monitoring_window_days,
            from,
            to,
            gee_min_duration_hours,
            gee_min_detections,
            gee_min_frp_sum,
            gee_min_frp_max,
            gee_rank_key,
            gee_max_candidates,
            version,
        } => {
            let window = parse_window(from.as_deref(), to.as_deref())?;
            let config = EpisodeConfig {
                input_status: input_status
                    .iter()
                    .map(|s| s.parse::<EventStatus>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|message| ConfigError::InvalidValue {
                        field: "input_status",
                        message,
                    })?,
                distance_threshold_m: distance_m,
                days_buffer,
                admin_mode: admin_mode.parse::<AdminMode>()?,
                geometry_mode: geometry_mode.parse::<GeometryMode>()?,
                geometry_buffer_m,
                strategy: strategy.parse::<AssignmentStrategy>()?,
                weights: ScoreWeights {
                    distance: weight_distance,
                    overlap: weight_overlap,
                    intensity: weight_intensity,
                    size: weight_size,
                },
                persistence: mode.parse::<PersistenceMode>()?,
                monitoring_window_days,
                window,
                gee: GeeConfig {
                    min_duration_hours: gee_min_duration_hours,
                    min_detections: gee_min_detections,
                    min_frp_sum: gee_min_frp_sum,
                    min_frp_max: gee_min_frp_max,
                    rank_key: gee_rank_key.parse::<RankKey>()?,
                    max_candidates: gee_max_candidates,
                },
                clustering_version: version,
                ..EpisodeConfig::default()
            }
            .clamped();
            let summary = aggregate_episodes(&mut store, &config, Utc::now(), cli.dry_run)?;
            summary.log();
            println!("{summary}");
        }

        Command::Backfill {
            resolution,
            workers,
            batch_size,
            max_rows,
        } => {
            let config = BackfillConfig {
                resolution,
                workers,
                batch_size,
                max_rows,
            };
            let stop = AtomicBool::new(false);
            if cli.dry_run {
                println!("backfill: dry run, nothing to do");
                return Ok(());
            }
            let summary = backfill_cells(&mut store, &config, &stop)?;
            println!("{}", summary.as_run_summary());
        }
    }

    if cli.dry_run {
        info!("dry run: snapshot not written");
        return Ok(());
    }
    store.save(&cli.store)?;
    Ok(())
}

fn parse_window(
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, ConfigError> {
    let parse = |field: &'static str, value: &str| {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ConfigError::InvalidValue {
                field,
                message: e.to_string(),
            })
    };
    match (from, to) {
        (Some(from), Some(to)) => Ok(Some((parse("from", from)?, parse("to", to)?))),
        (Some(from), None) => Ok(Some((parse("from", from)?, Utc::now()))),
        (None, Some(to)) => Ok(Some((DateTime::<Utc>::MIN_UTC, parse("to", to)?))),
        (None, None) => Ok(None),
    }
}
