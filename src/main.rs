use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use treedelta::config::DEFAULT_COMPRESSION_LEVEL;
use treedelta::{create_patch, PatchConfig};

#[derive(Parser)]
#[command(
    name = "treedelta",
    about = "Create a patch package that turns one directory tree into another"
)]
struct Cli {
    /// Root of the old (installed) tree
    before: PathBuf,
    /// Root of the new (target) tree
    after: PathBuf,
    /// Directory that receives the manifest and blobs. Emptied first.
    #[arg(long, short, default_value = "patch")]
    output: PathBuf,
    /// Filename suffix marking shared libraries; repeatable. Defaults to the platform's.
    #[arg(long = "library-suffix", value_name = "SUFFIX")]
    library_suffixes: Vec<String>,
    /// Probe and encode on a single thread
    #[arg(long)]
    sequential: bool,
    /// zstd level for delta blobs
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: i32,
}

impl Cli {
    fn config(&self) -> PatchConfig {
        let mut config = PatchConfig::new(&self.output)
            .with_parallel(!self.sequential)
            .with_compression_level(self.level);
        if !self.library_suffixes.is_empty() {
            config = config.with_library_suffixes(self.library_suffixes.iter().cloned());
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config();
    println!("Creating patch...");
    println!("  Before: {}", cli.before.display());
    println!("  After: {}", cli.after.display());
    println!("  Output: {}", config.output.display());

    let start = Instant::now();
    let summary = create_patch(&cli.before, &cli.after, &config).await?;
    let elapsed = start.elapsed();

    println!("\nPatch created successfully!");
    println!("  Files added: {}", summary.files_added);
    println!("  Files removed: {}", summary.files_removed);
    println!("  Files changed: {}", summary.files_changed);
    println!("  Files unchanged: {}", summary.files_unchanged);
    println!("  Libraries renamed: {}", summary.libraries_renamed);
    if summary.symlinks_skipped > 0 {
        println!("  Symlinks skipped: {}", summary.symlinks_skipped);
    }
    println!("  Blob bytes: {}", summary.blob_bytes);
    println!("  Tree digest: {}", summary.tree_digest.to_hex());
    println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());

    Ok(())
}
