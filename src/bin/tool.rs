//! layerkv offline tool
//!
//! Merge, export and point-read segment directories of one shard.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use layerkv::export::ExportParams;
use layerkv::layout::{IgnoreFieldCalculator, Schema, SchemaHistory};
use layerkv::merge::{CURRENT_TIME_IN_SECOND, DROP_DELETE_KEY};
use layerkv::segment::KkvSegment;
use layerkv::{
    hash_key, Checkpoint, ExportIterator, GetOptions, IndexConfig, IndexKind, KkvExportIterator,
    KvExportIterator, KvMerger, Locator, MergeConfig, ReadMetrics, ReaderOptions, Record,
    RecordKey, Result, SegmentReader, ShardReader, TargetSegment,
};
use tracing_subscriber::{fmt, EnvFilter};

/// layerkv offline tool
#[derive(Parser, Debug)]
#[command(name = "layerkv-tool")]
#[command(about = "Merge, export and inspect layerkv segments")]
#[command(version)]
struct Args {
    /// Index config (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Schema history (JSON list of schemas); defaults to the config's schema
    #[arg(long)]
    schemas: Option<PathBuf>,

    /// Reference time in seconds (defaults to now)
    #[arg(long)]
    now: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge source segments (oldest first) into one target segment
    Merge {
        /// Parent directory of the merged output
        #[arg(short, long)]
        target: PathBuf,

        /// Id of the merged segment
        #[arg(long, default_value = "1")]
        segment_id: u64,

        /// Locator of the merged segment
        #[arg(long)]
        locator: Option<u64>,

        /// Physically drop tombstones
        #[arg(long)]
        drop_delete_key: bool,

        /// Source segment directories, oldest first
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Export live records
    Export {
        /// Resume from a hex checkpoint
        #[arg(long)]
        checkpoint: Option<String>,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,

        /// Print raw keys when segments keep them
        #[arg(long)]
        recover_raw_key: bool,

        /// Segment directories
        #[arg(required = true)]
        segments: Vec<PathBuf>,
    },

    /// Look up one key
    Get {
        /// Raw key (hashed before lookup)
        key: String,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Segment directories
        #[arg(required = true)]
        segments: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,layerkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!("layerkv-tool v{}", layerkv::VERSION);

    if let Err(e) = run(args).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = IndexConfig::from_json_file(&args.config)?;
    let calculator = load_history(args.schemas.as_deref(), &config)?;
    let now = args.now.unwrap_or_else(unix_now);

    match args.command {
        Commands::Merge {
            target,
            segment_id,
            locator,
            drop_delete_key,
            sources,
        } => {
            let mut params = HashMap::new();
            params.insert(DROP_DELETE_KEY.to_string(), drop_delete_key.to_string());
            params.insert(CURRENT_TIME_IN_SECOND.to_string(), now.to_string());

            let merger = KvMerger::init(config, MergeConfig::default(), &params)?
                .with_schema_history(Arc::clone(&calculator));
            let sources = open_kv_segments(&sources)?;
            let mut target = TargetSegment::new(target, segment_id);
            if let Some(locator) = locator {
                target = target.with_locator(Locator(locator));
            }
            let result = merger.merge(&sources, &[target])?;
            println!(
                "{}\tkeys={}\ttombstones={}\texpired={}\tduplicates={}",
                result.dir.display(),
                result.stats.keys_written,
                result.stats.tombstones_written,
                result.stats.records_expired,
                result.stats.duplicates_skipped
            );
        }

        Commands::Export {
            checkpoint,
            limit,
            recover_raw_key,
            segments,
        } => {
            let params = ExportParams {
                recover_raw_key,
                ..Default::default()
            };
            let mut iter: Box<dyn ExportIterator> = match config.kind {
                IndexKind::Kv => Box::new(KvExportIterator::init(
                    open_kv_segments(&segments)?,
                    params,
                    &config,
                    &calculator,
                    now,
                )?),
                IndexKind::Kkv => {
                    let segments = segments
                        .iter()
                        .map(|dir| KkvSegment::open(dir).map(Arc::new))
                        .collect::<Result<Vec<_>>>()?;
                    Box::new(KkvExportIterator::init(
                        segments,
                        params,
                        &config,
                        &calculator,
                        now,
                    )?)
                }
            };
            if let Some(hex) = checkpoint {
                iter.seek(Checkpoint::from_hex(&hex)?)?;
            }

            let mut emitted = 0;
            while iter.has_next() && limit.map_or(true, |limit| emitted < limit) {
                let (record, checkpoint) = iter.next()?;
                println!("{}\t{}", format_record(&record), checkpoint.to_hex());
                emitted += 1;
            }
            tracing::info!("Exported {} records", emitted);
        }

        Commands::Get {
            key,
            timeout_ms,
            segments,
        } => {
            let options = ReaderOptions {
                timeout: timeout_ms.map(Duration::from_millis),
                ..Default::default()
            };
            let segments = open_kv_segments(&segments)?;
            let reader = ShardReader::open(segments, &config, &calculator, options)?;
            let opts = GetOptions::at(now);

            let mut metrics = ReadMetrics::new();
            let lookup = reader.get(hash_key(key.as_bytes()), &opts, Some(&mut metrics)).await;
            match lookup.value {
                Some(value) => println!("{:?}\t{}\t{}", lookup.status, lookup.timestamp, hex::encode(&value)),
                None => println!("{:?}", lookup.status),
            }
            tracing::debug!("{:?}", metrics);
        }
    }
    Ok(())
}

fn load_history(path: Option<&Path>, config: &IndexConfig) -> Result<Arc<IgnoreFieldCalculator>> {
    let history = match path {
        Some(path) => {
            let schemas: Vec<Schema> = serde_json::from_str(&fs::read_to_string(path)?)?;
            SchemaHistory::new(schemas)?
        }
        None => SchemaHistory::single(config.current_schema()),
    };
    Ok(Arc::new(IgnoreFieldCalculator::new(Arc::new(history))))
}

fn open_kv_segments(dirs: &[PathBuf]) -> Result<Vec<SegmentReader>> {
    let options = ReaderOptions::default();
    dirs.iter()
        .map(|dir| SegmentReader::open_disk(dir, &options))
        .collect()
}

fn format_record(record: &Record) -> String {
    let key = match record.key {
        RecordKey::Kv(key) => format!("{:016x}", key),
        RecordKey::Kkv { prefix, suffix } => format!("{:016x}:{:016x}", prefix, suffix),
    };
    let raw = record
        .raw_key
        .as_ref()
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .unwrap_or_default();
    format!("{}\t{}\t{}\t{}", key, raw, record.timestamp, hex::encode(&record.value))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
