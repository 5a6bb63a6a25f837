/*!
 * Strata - dataset inspection CLI
 *
 * Thin driver over the library for working with existing datasets:
 * - `inspect` prints the index summary
 * - `cat` decodes one sample by global id
 * - `validate` checks index and chunk invariants
 *
 * Exit codes: 0 success, 2 configuration error, 3 input partition
 * error, 4 worker failure, 5 store failure, 6 index merge timeout.
 */

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use strata::config::{parse_byte_size, ItemLoaderSpec, StreamConfig};
use strata::error::StrataError;
use strata::format::Value;
use strata::reader::StreamingDataset;
use strata::store::open_store;
use strata::{DatasetIndex, INDEX_FILENAME};

#[derive(Parser)]
#[command(name = "strata", version, about = "Streaming dataset tooling")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a dataset's index summary
    Inspect {
        /// Dataset location: path, local:<path>, or cloud URL
        input_dir: String,
    },

    /// Decode and print one sample by global id
    Cat {
        /// Dataset location
        input_dir: String,

        /// Global sample id
        sample_id: u64,

        /// Item loader: default or tokens(<block_size>)
        #[arg(long, default_value = "default")]
        item_loader: String,

        /// Local cache bound (e.g. 10GB)
        #[arg(long, default_value = "100GB")]
        max_cache_size: String,
    },

    /// Validate index invariants and chunk headers
    Validate {
        /// Dataset location
        input_dir: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = strata::logging::init_logging(cli.log_level.as_deref(), None) {
        eprintln!("{}", e);
        return ExitCode::from(2);
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<StrataError>()
                .map(|se| se.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Inspect { input_dir } => inspect(&input_dir),
        Command::Cat {
            input_dir,
            sample_id,
            item_loader,
            max_cache_size,
        } => cat(&input_dir, sample_id, &item_loader, &max_cache_size),
        Command::Validate { input_dir } => validate(&input_dir),
    }
}

fn load_index(input_dir: &str) -> anyhow::Result<DatasetIndex> {
    let (store, _) = open_store(input_dir)?;
    let bytes = store
        .get(INDEX_FILENAME)
        .map_err(StrataError::from)
        .with_context(|| format!("reading {} from {}", INDEX_FILENAME, input_dir))?;
    Ok(DatasetIndex::from_bytes(&bytes).map_err(StrataError::from)?)
}

fn inspect(input_dir: &str) -> anyhow::Result<()> {
    let index = load_index(input_dir)?;

    println!("dataset:        {}", input_dir);
    println!("format version: {}", index.version);
    println!(
        "compression:    {}",
        index.compression.as_deref().unwrap_or("none")
    );
    println!("total samples:  {}", index.total_samples);
    println!("chunks:         {}", index.total_chunks());
    println!("config hash:    {}", index.config_hash);
    println!("schema:");
    for field in &index.schema {
        println!("  {}: {}", field.name, field.codec);
    }

    let total_bytes: u64 = index.chunks.iter().map(|c| c.bytes).sum();
    println!("total bytes:    {}", total_bytes);
    if let Some(largest) = index.chunks.iter().max_by_key(|c| c.bytes) {
        println!(
            "largest chunk:  {} ({} bytes, {} samples)",
            largest.filename, largest.bytes, largest.samples
        );
    }
    Ok(())
}

fn cat(
    input_dir: &str,
    sample_id: u64,
    item_loader: &str,
    max_cache_size: &str,
) -> anyhow::Result<()> {
    let mut config = StreamConfig::new(input_dir);
    config.item_loader = ItemLoaderSpec::parse(item_loader)?;
    config.max_cache_size = parse_byte_size(max_cache_size)?;

    let dataset = StreamingDataset::new(config)?;
    let sample = dataset.get(sample_id)?;

    for (name, value) in sample.iter() {
        match value {
            Value::Int(v) => println!("{} (int): {}", name, v),
            Value::Float(v) => println!("{} (float): {}", name, v),
            Value::Str(v) => println!("{} (str): {}", name, v),
            Value::Bytes(v) => println!("{} (bytes): {} bytes", name, v.len()),
            Value::Image(img) => println!(
                "{} (image): {}x{} {:?}",
                name, img.width, img.height, img.color
            ),
            Value::Tensor(t) => {
                println!("{} (tensor): {:?} {:?}", name, t.dtype, t.shape)
            }
            Value::Tokens(t) => println!("{} (tokens): {} tokens", name, t.len()),
            Value::Opaque(v) => println!("{} (pickle): {} bytes", name, v.len()),
        }
    }
    Ok(())
}

fn validate(input_dir: &str) -> anyhow::Result<()> {
    let index = load_index(input_dir)?;
    index.validate().map_err(StrataError::from)?;

    let (store, _) = open_store(input_dir)?;
    let mut bad = 0usize;
    for chunk in &index.chunks {
        let meta = store
            .head(&chunk.filename)
            .map_err(StrataError::from)
            .with_context(|| format!("missing chunk {}", chunk.filename))?;
        if meta.size != chunk.bytes {
            eprintln!(
                "size mismatch for {}: index says {}, store says {}",
                chunk.filename, chunk.bytes, meta.size
            );
            bad += 1;
            continue;
        }
        // Header-only fetch keeps validation cheap for large chunks.
        let header_bytes = store
            .get_range(&chunk.filename, 0..strata::format::HEADER_LEN as u64)
            .map_err(StrataError::from)?;
        if let Err(e) = strata::format::ChunkHeader::parse(&header_bytes) {
            eprintln!("bad header in {}: {}", chunk.filename, e);
            bad += 1;
        }
    }

    if bad > 0 {
        anyhow::bail!("{} of {} chunks failed validation", bad, index.total_chunks());
    }
    println!(
        "ok: {} chunks, {} samples",
        index.total_chunks(),
        index.total_samples
    );
    Ok(())
}
