//! Binary entry point for the `sombra-ids` id allocation tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sombra_idblocks::{
    ids::{
        ConflictAvoidanceMode, ConsistentKeyIdAuthority, CounterMetrics, FixedBlockSizer,
        IdAuthority, IdAuthorityOptions, IdBlock, IdBlockSizer, MetricsSnapshot,
        NamespaceBlockSizer, RawOptions, SizerConfig,
    },
    logging::init_logging,
    primitives::time::{Clock, ManualClock, SystemClock},
    storage::{MemoryStoreManager, StoreFeatures, StoreManager},
    NamespaceId, PartitionId,
};

#[derive(Parser, Debug)]
#[command(
    name = "sombra-ids",
    version,
    about = "Allocate and stress-test Sombra id blocks against an in-memory store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "SOMBRA_LOG",
        default_value = "warn",
        help = "Tracing filter directive (e.g. sombra_idblocks=debug)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct AuthorityArgs {
    #[arg(long, value_name = "FILE", help = "TOML file with authority options and a [sizer] table")]
    config: Option<PathBuf>,

    #[arg(long, help = "Unique instance id (overrides the config file)")]
    instance: Option<String>,

    #[arg(long, value_name = "MS", help = "Claim wait time in milliseconds")]
    wait_ms: Option<u64>,

    #[arg(long, value_enum, help = "Conflict avoidance mode")]
    mode: Option<ModeArg>,

    #[arg(long, help = "Uniqueness tag width in bits")]
    cav_bits: Option<u32>,

    #[arg(long, help = "Fixed uniqueness tag for the manual modes")]
    cav_tag: Option<u32>,

    #[arg(long, help = "Seed for random tag selection")]
    seed: Option<u64>,

    #[arg(long, help = "Ids per block (overrides the [sizer] table)")]
    block_size: Option<u64>,

    #[arg(long, help = "Exclusive id ceiling (overrides the [sizer] table)")]
    upper_bound: Option<u64>,
}

#[derive(Args, Debug)]
struct AllocateCmd {
    #[command(flatten)]
    authority: AuthorityArgs,

    #[arg(long, default_value_t = 0, help = "Partition to allocate from")]
    partition: u32,

    #[arg(long, default_value_t = 0, help = "Namespace to allocate from")]
    namespace: u32,

    #[arg(long, default_value_t = 1, help = "Number of blocks to allocate")]
    count: usize,

    #[arg(long, value_name = "MS", default_value_t = 10_000, help = "Timeout per block")]
    timeout_ms: u64,
}

#[derive(Args, Debug)]
struct StressCmd {
    #[command(flatten)]
    authority: AuthorityArgs,

    #[arg(long, default_value_t = 8, help = "Concurrent authority instances")]
    instances: usize,

    #[arg(long, default_value_t = 100, help = "Blocks requested by each instance")]
    blocks: usize,

    #[arg(long, default_value_t = 0, help = "Namespace to allocate from")]
    namespace: u32,

    #[arg(
        long,
        value_name = "MS",
        default_value_t = 3_600_000,
        help = "Virtual-time timeout per block"
    )]
    timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Allocate id blocks from a fresh in-memory store")]
    Allocate(AllocateCmd),

    #[command(about = "Run concurrent authorities on one simulated cluster and check disjointness")]
    Stress(StressCmd),

    #[command(about = "Print validated authority options")]
    ShowConfig(AuthorityArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    None,
    #[value(name = "local-manual")]
    LocalManual,
    #[value(name = "global-manual")]
    GlobalManual,
    #[value(name = "global-auto")]
    GlobalAuto,
}

impl From<ModeArg> for ConflictAvoidanceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::None => ConflictAvoidanceMode::None,
            ModeArg::LocalManual => ConflictAvoidanceMode::LocalManual,
            ModeArg::GlobalManual => ConflictAvoidanceMode::GlobalManual,
            ModeArg::GlobalAuto => ConflictAvoidanceMode::GlobalAuto,
        }
    }
}

#[derive(Serialize, Debug)]
struct BlockReport {
    start: u64,
    end: u64,
    tag: u32,
    first_id: u64,
    last_id: u64,
}

impl BlockReport {
    fn from_block(block: &IdBlock) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            start: block.start_count(),
            end: block.end_count(),
            tag: block.tag(),
            first_id: block.get_id(0)?,
            last_id: block.get_id(block.num_ids() - 1)?,
        })
    }
}

#[derive(Serialize, Debug)]
struct AllocateReport {
    instance: String,
    partition: u32,
    namespace: u32,
    blocks: Vec<BlockReport>,
    metrics: MetricsSnapshot,
}

#[derive(Serialize, Debug)]
struct StressReport {
    instances: usize,
    blocks: usize,
    ids: u64,
    overlaps: usize,
    disjoint: bool,
    virtual_elapsed_ms: u128,
    wall_elapsed_ms: u128,
    metrics: MetricsSnapshot,
}

#[derive(Serialize, Debug)]
struct ConfigReport {
    options: RawOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    sizer: Option<SizerConfig>,
}

struct Resolved {
    options: IdAuthorityOptions,
    sizer: Arc<dyn IdBlockSizer>,
    sizer_config: Option<SizerConfig>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Allocate(cmd) => {
            let report = run_allocate(&cmd)?;
            emit(&cli.format, &report, |_| print_allocate_text(&report))?;
        }
        Command::Stress(cmd) => {
            let report = run_stress(&cmd)?;
            emit(&cli.format, &report, |_| print_stress_text(&report))?;
            if !report.disjoint {
                std::process::exit(2);
            }
        }
        Command::ShowConfig(args) => {
            let resolved = resolve(&args, "sombra-ids")?;
            let report = ConfigReport {
                options: resolved.options.to_raw(),
                sizer: resolved.sizer_config,
            };
            emit(&cli.format, &report, |_| {
                if let Ok(text) = toml::to_string(&report) {
                    print!("{text}");
                }
            })?;
        }
    }

    Ok(())
}

fn resolve(args: &AuthorityArgs, default_instance: &str) -> Result<Resolved, Box<dyn Error>> {
    let raw = match &args.config {
        Some(path) => Some(fs::read_to_string(path)?),
        None => None,
    };
    let mut options = match &raw {
        Some(text) => {
            if text.contains("unique_instance_id") {
                IdAuthorityOptions::from_toml_str(text)?
            } else {
                IdAuthorityOptions::from_toml_str(&format!(
                    "unique_instance_id = \"{default_instance}\"\n{text}"
                ))?
            }
        }
        None => IdAuthorityOptions::new(default_instance),
    };
    if let Some(instance) = &args.instance {
        options.unique_instance_id = instance.clone();
    }
    if let Some(ms) = args.wait_ms {
        options.wait = Duration::from_millis(ms);
    }
    if let Some(mode) = args.mode {
        options.conflict_avoidance = mode.into();
    }
    if let Some(bits) = args.cav_bits {
        options.cav_bits = bits;
    }
    if let Some(tag) = args.cav_tag {
        options.cav_tag = Some(tag);
    }
    if let Some(seed) = args.seed {
        options.rng_seed = Some(seed);
    }
    if options.conflict_avoidance == ConflictAvoidanceMode::GlobalAuto {
        options.cav_retries = options.cav_retries.min(options.tag_count().saturating_sub(1));
    }
    options.validate()?;

    let mut sizer_config = match &raw {
        Some(text) => SizerConfig::from_toml_str(text)?,
        None => None,
    };
    if args.block_size.is_some() || args.upper_bound.is_some() {
        let base = sizer_config.take().unwrap_or(SizerConfig {
            block_size: 10_000,
            upper_bound: 1 << 30,
            namespaces: Vec::new(),
        });
        sizer_config = Some(SizerConfig {
            block_size: args.block_size.unwrap_or(base.block_size),
            upper_bound: args.upper_bound.unwrap_or(base.upper_bound),
            namespaces: base.namespaces,
        });
    }
    let sizer: Arc<dyn IdBlockSizer> = match &sizer_config {
        Some(config) => Arc::new(NamespaceBlockSizer::from_config(config)?),
        None => Arc::new(FixedBlockSizer::new(10_000, 1 << 30)?),
    };
    Ok(Resolved {
        options,
        sizer,
        sizer_config,
    })
}

fn run_allocate(cmd: &AllocateCmd) -> Result<AllocateReport, Box<dyn Error>> {
    let resolved = resolve(&cmd.authority, "sombra-ids")?;
    let manager: Arc<dyn StoreManager> = Arc::new(MemoryStoreManager::new());
    let metrics = Arc::new(CounterMetrics::default());
    let authority = ConsistentKeyIdAuthority::open_with(
        manager,
        resolved.options,
        Arc::new(SystemClock::new()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(resolved.sizer);

    let timeout = Duration::from_millis(cmd.timeout_ms);
    let blocks = (0..cmd.count)
        .map(|_| {
            let block = authority.get_id_block(
                PartitionId(cmd.partition),
                NamespaceId(cmd.namespace),
                timeout,
            )?;
            BlockReport::from_block(&block)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let instance = authority.unique_id().to_owned();
    authority.close()?;

    Ok(AllocateReport {
        instance,
        partition: cmd.partition,
        namespace: cmd.namespace,
        blocks,
        metrics: metrics.snapshot(),
    })
}

fn run_stress(cmd: &StressCmd) -> Result<StressReport, Box<dyn Error>> {
    let resolved = resolve(&cmd.authority, "stress")?;
    let manager = MemoryStoreManager::with_features(StoreFeatures::local().distributed(true));
    let clock = ManualClock::default();
    let metrics = Arc::new(CounterMetrics::default());
    let timeout = Duration::from_millis(cmd.timeout_ms);
    let namespace = NamespaceId(cmd.namespace);
    let wall = Instant::now();

    let mut authorities = Vec::with_capacity(cmd.instances);
    for i in 0..cmd.instances {
        let mut options = resolved.options.clone();
        options.unique_instance_id = format!("{}-{i}", resolved.options.unique_instance_id);
        options.rng_seed = resolved.options.rng_seed.map(|seed| seed.wrapping_add(i as u64));
        let authority = ConsistentKeyIdAuthority::open_with(
            Arc::new(manager.clone()),
            options,
            Arc::new(clock.clone()),
            metrics.clone(),
        )?;
        authority.set_id_block_sizer(Arc::clone(&resolved.sizer));
        authorities.push(Arc::new(authority));
    }

    let handles: Vec<_> = authorities
        .iter()
        .map(|authority| {
            let authority = Arc::clone(authority);
            let blocks = cmd.blocks;
            thread::spawn(move || {
                (0..blocks)
                    .map(|_| authority.get_id_block(PartitionId(0), namespace, timeout))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    let mut blocks = Vec::with_capacity(cmd.instances * cmd.blocks);
    for handle in handles {
        let won = handle
            .join()
            .map_err(|_| "stress worker panicked".to_string())??;
        blocks.extend(won);
    }
    for authority in &authorities {
        authority.close()?;
    }

    let overlaps = count_overlaps(&blocks);
    Ok(StressReport {
        instances: cmd.instances,
        blocks: blocks.len(),
        ids: blocks.iter().map(IdBlock::num_ids).sum(),
        overlaps,
        disjoint: overlaps == 0,
        virtual_elapsed_ms: clock.elapsed().as_millis(),
        wall_elapsed_ms: wall.elapsed().as_millis(),
        metrics: metrics.snapshot(),
    })
}

/// Number of adjacent overlapping pairs after sorting blocks by tag and start.
fn count_overlaps(blocks: &[IdBlock]) -> usize {
    let mut sorted: Vec<&IdBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| (b.tag(), b.start_count()));
    sorted
        .windows(2)
        .filter(|w| w[0].tag() == w[1].tag() && w[0].end_count() > w[1].start_count())
        .count()
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_allocate_text(report: &AllocateReport) {
    println!(
        "Instance {} partition={} namespace={}",
        report.instance, report.partition, report.namespace
    );
    for block in &report.blocks {
        println!(
            "  [{}, {}) tag={} ids={}..={}",
            block.start, block.end, block.tag, block.first_id, block.last_id
        );
    }
}

fn print_stress_text(report: &StressReport) {
    println!(
        "Stress: instances={} blocks={} ids={} overlaps={} disjoint={}",
        report.instances, report.blocks, report.ids, report.overlaps, report.disjoint
    );
    println!(
        "  claims_won={} claims_lost={} temporary_failures={} timeouts={}",
        report.metrics.claims_won,
        report.metrics.claims_lost,
        report.metrics.temporary_failures,
        report.metrics.timeouts
    );
    println!(
        "  virtual_elapsed={} ms wall_elapsed={} ms",
        report.virtual_elapsed_ms, report.wall_elapsed_ms
    );
}
