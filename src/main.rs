use clap::{Parser, Subcommand};
use roomfile::block::BlockId;
use roomfile::io_stream::{ReadOptions, WriteOptions};
use roomfile::room::RoomFile;
use roomfile::RoomFileVersion;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roomfile", about = "Inspect and build chunked room files")]
struct Cli {
    /// Log block-level detail (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show format version and block summary
    Info {
        input: PathBuf,
    },
    /// List blocks in file order
    List {
        input: PathBuf,
        /// Print the block index as JSON
        #[arg(long)]
        json: bool,
    },
    /// Hex-dump one block's payload
    Dump {
        input: PathBuf,
        /// Block name: a table name such as Main, or a string id
        block: String,
        /// Maximum bytes to print
        #[arg(short, long, default_value = "256")]
        limit: usize,
    },
    /// Write every block payload to a directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Read the whole file strictly and report the first problem
    Verify {
        input: PathBuf,
    },
    /// Build a room file from raw payload files
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Container format version (default: newest)
        #[arg(long)]
        format_version: Option<u16>,
        /// NAME=PATH, where NAME is a table name, a numeric id or a string id
        #[arg(short, long, required = true, num_args = 1..)]
        block: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let room = RoomFile::open(&input)?;
            let idx  = room.index();
            println!("── Room file ────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Format version {}", room.version());
            println!("  Length fields  {}", if room.version().has_wide_lengths() { "64-bit" } else { "32-bit" });
            println!("  Blocks         {}", idx.entries.len());
            println!("  Payload bytes  {}", idx.total_payload());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let room = RoomFile::open(&input)?;
            if json {
                println!("{}", String::from_utf8(room.index().to_bytes()?)?);
                return Ok(());
            }
            println!("{:<18} {:>6} {:>12} {:>12}  CRC32", "Name", "Id", "Offset", "Length");
            for e in room.list() {
                let id = match &e.id {
                    BlockId::Numeric(n) => n.to_string(),
                    BlockId::Named(_)   => "str".into(),
                };
                println!("{:<18} {:>6} {:>12} {:>12}  {:08x}",
                    e.name, id, e.payload_offset, e.length, e.crc32);
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, block, limit } => {
            let mut room = RoomFile::open(&input)?;
            let data = room.read_block(&block)?;
            let shown = &data[..data.len().min(limit)];
            for (i, row) in shown.chunks(16).enumerate() {
                println!("{:08x}  {}", i * 16, hex::encode(row));
            }
            if shown.len() < data.len() {
                println!("… {} more bytes", data.len() - shown.len());
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir } => {
            let mut room = RoomFile::open(&input)?;
            for path in room.extract_all(&output_dir)? {
                println!("  wrote  {}", path.display());
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let opts = ReadOptions { strict_block_ids: true, strict_payload: true };
            let room = RoomFile::open_with_options(&input, opts)?;
            room.index().check_supported()?;
            println!("OK: {} blocks, format {}", room.list().len(), room.version());
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, format_version, block } => {
            let version = format_version.map(RoomFileVersion).unwrap_or_default();
            let mut w = RoomFile::create(&output, WriteOptions { version })?;
            for arg in &block {
                let (name, path) = arg
                    .split_once('=')
                    .ok_or_else(|| format!("expected NAME=PATH, got '{arg}'"))?;
                let id = BlockId::parse(name);
                let data = std::fs::read(path)?;
                w.write_block_bytes(&id, &data)?;
                println!("  packed  {id}  {} bytes", data.len());
            }
            w.finish()?;
            println!("Created: {}", output.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
