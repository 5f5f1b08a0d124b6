use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sombra_linkbag::{
    primitives::pager::{MemPager, PageStore, PagerStats},
    storage::{btree::BTreeStatsSnapshot, CounterMetrics},
    types::FileId,
    ConfigProvider, FileConfig, LinkBagOptions, LinkCollection, RepresentationKind, Rid,
    SharedLinkBagBTree, Transaction,
};

#[derive(Parser, Debug)]
#[command(
    name = "sombra-linkbag",
    version,
    about = "Exercise Sombra link bags against an in-memory page store",
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
        value_name = "FILE",
        help = "TOML file with a [linkbag] table"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Replay a random add/remove workload against one bag")]
    Simulate(SimulateCmd),
    #[command(about = "Print the effective link bag options")]
    Config,
}

#[derive(Args, Debug)]
struct SimulateCmd {
    #[arg(long, default_value_t = 200, help = "Number of links to add")]
    links: usize,

    #[arg(long, default_value_t = 150, help = "Number of links to remove afterwards")]
    removes: usize,

    #[arg(long, allow_hyphen_values = true, help = "Override the embedded to tree threshold")]
    top: Option<i32>,

    #[arg(long, allow_hyphen_values = true, help = "Override the tree to embedded threshold")]
    bottom: Option<i32>,

    #[arg(long, default_value_t = 4096, help = "Page size in bytes")]
    page_size: u32,

    #[arg(long, default_value_t = 32, help = "Flush the bag every N operations (0 = only at the end)")]
    flush_every: usize,

    #[arg(long, default_value_t = 0x5eed, help = "Workload seed")]
    seed: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct Transition {
    step: usize,
    op: &'static str,
    rid: String,
    from: &'static str,
    to: &'static str,
    size: usize,
}

#[derive(Serialize)]
struct SimulationReport {
    seed: u64,
    embedded_to_tree_threshold: i32,
    tree_to_embedded_threshold: i32,
    operations: usize,
    final_size: usize,
    final_representation: &'static str,
    persisted_size: usize,
    transitions: Vec<Transition>,
    conversions_to_tree: u64,
    conversions_to_embedded: u64,
    flushed_entries: u64,
    deleted_bags: u64,
    btree: BTreeStatsSnapshot,
    pager: PagerStats,
}

#[derive(Serialize)]
struct EffectiveConfig {
    source: String,
    embedded_to_tree_threshold: i32,
    tree_to_embedded_threshold: i32,
    max_multiplicity: u32,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let options = load_options(cli.config.as_ref())?;
    match cli.command {
        Command::Simulate(cmd) => {
            let report = simulate(&cmd, options)?;
            emit(&cli.format, &report, || print_simulation_text(&report))?;
        }
        Command::Config => {
            let report = EffectiveConfig {
                source: cli
                    .config
                    .as_ref()
                    .map_or_else(|| "defaults".to_string(), |p| p.display().to_string()),
                embedded_to_tree_threshold: options.embedded_to_tree_threshold,
                tree_to_embedded_threshold: options.tree_to_embedded_threshold,
                max_multiplicity: options.max_multiplicity,
            };
            emit(&cli.format, &report, || {
                println!("source: {}", report.source);
                println!("embedded_to_tree_threshold = {}", report.embedded_to_tree_threshold);
                println!("tree_to_embedded_threshold = {}", report.tree_to_embedded_threshold);
                println!("max_multiplicity = {}", report.max_multiplicity);
            })?;
        }
    }
    Ok(())
}

fn load_options(path: Option<&PathBuf>) -> Result<LinkBagOptions, Box<dyn Error>> {
    let options = match path {
        Some(path) => FileConfig::load(path)?.resolve(),
        None => LinkBagOptions::default(),
    };
    let options = options.with_env_overrides()?;
    options.validate()?;
    Ok(options)
}

fn kind_name(kind: RepresentationKind) -> &'static str {
    match kind {
        RepresentationKind::Embedded => "embedded",
        RepresentationKind::Tree => "tree",
    }
}

fn simulate(cmd: &SimulateCmd, base: LinkBagOptions) -> Result<SimulationReport, Box<dyn Error>> {
    let metrics = Arc::new(CounterMetrics::default());
    let options = base
        .clone()
        .with_thresholds(
            cmd.top.unwrap_or(base.embedded_to_tree_threshold),
            cmd.bottom.unwrap_or(base.tree_to_embedded_threshold),
        )
        .with_metrics(metrics.clone());
    let options = options.link_bag_options()?;

    let pager = MemPager::new(cmd.page_size)?;
    let tree = {
        let mut op = pager.begin_atomic()?;
        let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
        op.commit()?;
        tree
    };

    let mut rng = ChaCha8Rng::seed_from_u64(cmd.seed);
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    let mut live: Vec<Rid> = Vec::new();
    let mut transitions = Vec::new();
    let pos_range = (cmd.links as i64).max(1) * 2;
    let total = cmd.links + cmd.removes;

    for step in 0..total {
        let before = bag.kind();
        let (op, rid) = if step < cmd.links {
            let rid = Rid::new(rng.gen_range(0..16), rng.gen_range(0..pos_range))?;
            if bag.add(&mut tx, rid)? {
                live.push(rid);
            }
            ("add", rid)
        } else if live.is_empty() {
            break;
        } else {
            let rid = live.swap_remove(rng.gen_range(0..live.len()));
            bag.remove(&mut tx, rid)?;
            ("remove", rid)
        };
        let after = bag.kind();
        if before != after {
            transitions.push(Transition {
                step,
                op,
                rid: rid.to_string(),
                from: kind_name(before),
                to: kind_name(after),
                size: bag.size(),
            });
        }
        if cmd.flush_every > 0 && (step + 1) % cmd.flush_every == 0 {
            bag.flush(&mut tx)?;
        }
    }
    bag.flush(&mut tx)?;
    tx.commit()?;
    bag.transaction_finished();

    let tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let persisted_size = bag.iter(&tx)?.try_fold(0usize, |n, rid| rid.map(|_| n + 1))?;
    tx.rollback();
    tree.stats().emit_tracing();

    Ok(SimulationReport {
        seed: cmd.seed,
        embedded_to_tree_threshold: options.embedded_to_tree_threshold,
        tree_to_embedded_threshold: options.tree_to_embedded_threshold,
        operations: total,
        final_size: bag.size(),
        final_representation: kind_name(bag.kind()),
        persisted_size,
        transitions,
        conversions_to_tree: metrics.to_tree.load(Ordering::Relaxed),
        conversions_to_embedded: metrics.to_embedded.load(Ordering::Relaxed),
        flushed_entries: metrics.flushed_entries.load(Ordering::Relaxed),
        deleted_bags: metrics.bags_deleted.load(Ordering::Relaxed),
        btree: tree.stats().snapshot(),
        pager: pager.stats(),
    })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_simulation_text(report: &SimulationReport) {
    println!(
        "seed={} top={} bottom={} operations={}",
        report.seed,
        report.embedded_to_tree_threshold,
        report.tree_to_embedded_threshold,
        report.operations
    );
    for t in &report.transitions {
        println!(
            "  step {:>5} {:<6} {:<12} {} -> {} (size {})",
            t.step, t.op, t.rid, t.from, t.to, t.size
        );
    }
    println!(
        "final: {} size={} persisted={}",
        report.final_representation, report.final_size, report.persisted_size
    );
    println!(
        "conversions: to_tree={} to_embedded={} flushed_entries={} deleted_bags={}",
        report.conversions_to_tree,
        report.conversions_to_embedded,
        report.flushed_entries,
        report.deleted_bags
    );
    println!(
        "btree: inserts={} deletes={} leaf_splits={} root_splits={}",
        report.btree.inserts, report.btree.deletes, report.btree.leaf_splits, report.btree.root_splits
    );
    println!(
        "pager: commits={} pages_written={} rollbacks={}",
        report.pager.commits, report.pager.pages_written, report.pager.rollbacks
    );
}
