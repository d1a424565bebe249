//! CLI entry point for `daft`.
//!
//! Subcommands:
//! - `plan`: show how a signal length decomposes for a chunk size
//! - `import`: load a raw file of interleaved little-endian `f64` pairs into the store
//! - `transform`: transform a stored dataset into another dataset
//! - `inspect`: print a dataset's length and leading values
//!
//! Settings come from `daft.toml` (or `--config`), `DAFT_*` environment
//! variables, and per-command flags, in increasing priority.
//!
//! # Usage
//!
//! ```bash
//! daft import --raw samples.bin --dataset signal
//! daft transform --input signal --output spectrum --chunksize 1048576
//! daft inspect --dataset spectrum --head 8
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daft::config::DaftConfig;
use daft::{logging, plan, ComputationGraph, Daft, DatasetSource, SignalSource};
use daft_store::{import_interleaved, COMPLEX128_BYTES};
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "daft")]
#[command(about = "Out-of-core radix-2 FFT over persistent datasets", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = daft::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured store location
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the decomposition of a signal length
    Plan {
        #[arg(long)]
        len: u64,

        #[arg(long)]
        chunksize: Option<usize>,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Transform dataset INPUT into dataset OUTPUT
    Transform {
        #[arg(long)]
        input: String,

        #[arg(long)]
        output: String,

        #[arg(long)]
        chunksize: Option<usize>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Load interleaved little-endian (re, im) f64 pairs into a dataset
    Import {
        #[arg(long)]
        raw: PathBuf,

        #[arg(long)]
        dataset: String,
    },

    /// Print the length and leading values of a dataset
    Inspect {
        #[arg(long)]
        dataset: String,

        #[arg(long, default_value = "8")]
        head: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaftConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Plan {
            len,
            chunksize,
            json,
        } => show_plan(&config, len, chunksize, json),
        Commands::Transform {
            input,
            output,
            chunksize,
            workers,
        } => {
            if let Some(chunksize) = chunksize {
                config.engine.chunksize = chunksize;
            }
            if let Some(workers) = workers {
                config.engine.workers = workers;
            }
            config.validate()?;
            transform(config, input, output).await
        }
        Commands::Import { raw, dataset } => import(config, raw, dataset).await,
        Commands::Inspect { dataset, head } => inspect(&config, &dataset, head),
    }
}

fn show_plan(config: &DaftConfig, len: u64, chunksize: Option<usize>, as_json: bool) -> Result<()> {
    let chunksize = chunksize.unwrap_or(config.engine.chunksize);
    let plan = plan(len, chunksize)?;

    if as_json {
        let summary = json!({
            "len": plan.len(),
            "chunksize": plan.chunksize(),
            "leaf_len": plan.leaf_len(),
            "height": plan.height(),
            "leaves": plan.leaf_count(),
            "nodes": plan.node_count(),
            "leaf_bytes": plan.leaf_len() * COMPLEX128_BYTES,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("length:     {}", plan.len());
    println!("chunksize:  {}", plan.chunksize());
    println!("leaf len:   {}", plan.leaf_len());
    println!("height:     {}", plan.height());
    println!("leaves:     {}", plan.leaf_count());
    println!("nodes:      {}", plan.node_count());
    println!(
        "block size: {} bytes",
        plan.leaf_len() * COMPLEX128_BYTES
    );
    Ok(())
}

async fn transform(config: DaftConfig, input: String, output: String) -> Result<()> {
    let daft = Daft::from_config(&config);
    let token = daft.cancel_token().clone();

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling transform");
            token.cancel();
        }
    });

    let target = output.clone();
    let job = tokio::task::spawn_blocking(move || -> Result<_> {
        let store = config.open_store()?;
        let source = DatasetSource::open(store.as_ref(), &input)?;
        let graph = ComputationGraph::build(&source, daft.chunksize())?;
        info!(
            input = %input,
            output = %target,
            len = source.len(),
            leaf_len = graph.plan().leaf_len(),
            tasks = graph.tasks().len(),
            workers = daft.workers(),
            "Starting transform"
        );

        let cache = config.build_cache()?;
        let written = graph.write_to_store(&daft, store.as_ref(), &target, &cache)?;
        Ok((written, cache.stats()))
    });

    let result = job.await.context("transform task panicked")?;
    watcher.abort();

    let (written, stats) = result?;
    println!("✅ Wrote {written} elements to '{output}'");
    println!(
        "   cache: {} hits, {} misses, {} evictions, {} spills",
        stats.hits, stats.misses, stats.evictions, stats.spills
    );
    Ok(())
}

async fn import(config: DaftConfig, raw: PathBuf, dataset: String) -> Result<()> {
    let bytes = tokio::fs::metadata(&raw)
        .await
        .with_context(|| format!("reading {}", raw.display()))?
        .len();
    if bytes % COMPLEX128_BYTES as u64 != 0 {
        bail!(
            "{} holds {bytes} bytes, not a whole number of {COMPLEX128_BYTES}-byte complex samples",
            raw.display()
        );
    }
    let len = bytes / COMPLEX128_BYTES as u64;

    let imported = tokio::task::spawn_blocking(move || -> Result<u64> {
        let store = config.open_store()?;
        let reader = BufReader::new(File::open(&raw)?);
        Ok(import_interleaved(store.as_ref(), &dataset, reader, len)?)
    })
    .await
    .context("import task panicked")??;

    println!("✅ Imported {imported} samples");
    Ok(())
}

fn inspect(config: &DaftConfig, dataset: &str, head: usize) -> Result<()> {
    let store = config.open_store()?;
    let len = store.dataset_len(dataset)?;
    println!("{dataset}: {len} elements");

    let shown = head.min(len as usize);
    for (i, value) in store.read_slice(dataset, 0, shown)?.iter().enumerate() {
        println!("  [{i}] {:+.6e} {:+.6e}i", value.re, value.im);
    }
    Ok(())
}
