use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kmerstream_lib::ingest::{FsFileSizer, KmerSketch};
use kmerstream_lib::hasher::DeterministicHasher;
use kmerstream_lib::reader::read_kmers;
use kmerstream_lib::{
    run_ranks, write_table, Communicator, DistributedCountTable, IngestConfiguration,
    ReaderStrategy, SelfComm, StreamingIngest, SystemMemory, TableKind, WriteStrategy,
};
use tracing::{error, info};

const SAMPLE_INPUT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/test.fasta");

#[derive(Parser)]
#[command(name = "kmerstream")]
#[command(version = "0.1.0")]
#[command(about = "Memory-bounded distributed k-mer counting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count k-mers in the input files and write the table
    Count {
        /// Output file, or base name of per-rank output files
        #[arg(short = 'O', long, default_value = "./counts.bin")]
        output: PathBuf,

        /// Lower count threshold (reported, not applied)
        #[arg(short = 'L', long, default_value = "0")]
        lower_threshold: u32,

        /// Reader id: 2 file loader, 5 mmap, 7 posix, 10 collective
        #[arg(short = 'A', long, default_value = "7")]
        reader: u32,

        /// Writer id: 0 disabled, 2/3 mmap, 5/6 posix, 7/8 direct, 10 collective
        #[arg(short = 'B', long, default_value = "0")]
        writer: u32,

        /// K-mer length
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Count a k-mer and its reverse complement together
        #[arg(long, default_value = "false")]
        canonical: bool,

        /// Inputs are FASTQ
        #[arg(long, default_value = "false")]
        fastq: bool,

        /// Local table: hash or sorted
        #[arg(long, default_value = "hash")]
        table: TableKind,

        /// Number of ranks
        #[arg(short = 'n', long, default_value = "1")]
        ranks: usize,

        /// Ranks sharing one node
        #[arg(long, default_value = "1")]
        ranks_per_node: usize,

        /// Memory held back from planning over the whole run, in GiB
        #[arg(long, default_value = "8")]
        reserve_gib: u64,

        /// Device block size for direct writes
        #[arg(long, default_value = "512")]
        block_size: usize,

        /// Write direct outputs through the page cache instead of O_DIRECT
        #[arg(long, default_value = "false")]
        no_direct: bool,

        /// Input FASTA/FASTQ files
        files: Vec<PathBuf>,
    },

    /// Estimate the number of distinct k-mers without counting them
    Estimate {
        /// K-mer length
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Count a k-mer and its reverse complement together
        #[arg(long, default_value = "false")]
        canonical: bool,

        /// Register precision (4 to 16)
        #[arg(short, long, default_value = "12")]
        precision: u8,

        /// Input FASTA/FASTQ files
        files: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Count {
            output,
            lower_threshold,
            reader,
            writer,
            k,
            canonical,
            fastq,
            table,
            ranks,
            ranks_per_node,
            reserve_gib,
            block_size,
            no_direct,
            files,
        } => {
            let config = IngestConfiguration {
                k,
                canonical,
                fastq,
                reader: ReaderStrategy::try_from(reader)?,
                writer: WriteStrategy::try_from(writer)?,
                table,
                output,
                lower_threshold,
                global_reserve_bytes: reserve_gib << 30,
                block_size,
                open_direct: !no_direct,
                num_ranks: ranks,
                ranks_per_node,
                ..IngestConfiguration::default()
            };
            count_command(config, with_default_input(files))?;
        }
        Commands::Estimate {
            k,
            canonical,
            precision,
            files,
        } => {
            estimate_command(k, canonical, precision, with_default_input(files))?;
        }
    }

    Ok(())
}

fn with_default_input(files: Vec<PathBuf>) -> Vec<PathBuf> {
    if files.is_empty() {
        vec![PathBuf::from(SAMPLE_INPUT)]
    } else {
        files
    }
}

/// Count k-mers on every rank, then write the table
fn count_command(config: IngestConfiguration, files: Vec<PathBuf>) -> anyhow::Result<()> {
    config.validate()?;
    config.print();

    let outcomes = run_ranks(config.num_ranks, config.ranks_per_node, |comm| {
        let mut table =
            DistributedCountTable::new(config.table.new_container(config.seed), config.seed);
        let report = StreamingIngest::new(&config, &comm)?.run(
            &files,
            &mut table,
            &mut SystemMemory::new(),
            &mut FsFileSizer,
        )?;
        let written = write_table(&table, &comm, &config.output_config())?;
        if comm.rank() == 0 {
            report.print();
        }
        Ok::<_, kmerstream_lib::IngestError>(written)
    })?;

    let mut total = 0u64;
    let mut failed = None;
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(written) => total += written,
            Err(e) => {
                error!("rank {}: {}", rank, e);
                failed.get_or_insert(e);
            }
        }
    }
    if let Some(e) = failed {
        return Err(e.into());
    }

    if config.writer != WriteStrategy::Disabled {
        info!("wrote {} bytes to {}", total, config.output.display());
    }
    Ok(())
}

/// Fold every k-mer into a register estimator and report the distinct estimate
fn estimate_command(
    k: usize,
    canonical: bool,
    precision: u8,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let config = IngestConfiguration {
        k,
        canonical,
        hll_precision: precision,
        ..IngestConfiguration::default()
    };
    config.validate()?;
    let spec = config.kmer_spec()?;
    let mut sketch = KmerSketch::with_hasher(precision, DeterministicHasher::new(!config.seed))?;

    let mut staged = Vec::new();
    let mut total = 0u64;
    for path in &files {
        staged.clear();
        let stats = read_kmers(path, config.reader, &spec, &SelfComm, &mut staged)?;
        for key in &staged {
            sketch.update(key);
        }
        total += stats.kmers;
        info!("  {}: {} k-mers", path.display(), stats.kmers);
    }

    info!("Estimate Complete");
    info!("  files = {}", files.len());
    info!("  k-mers = {}", total);
    info!("  estimated distinct = {:.0}", sketch.estimate());
    Ok(())
}
