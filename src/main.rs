use clap::{Parser, Subcommand};
use ggpack::ggpk::Ggpk;
use ggpack::index::{DirectoryBundles, Index};
use ggpack::tree::PathTree;
use ggpack::{get_compressor, Compressor, StoreOptions};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ggpack", about = "Inspect and patch GGPK pack files and bundle indexes")]
struct Cli {
    /// JSON file with store options (compression level, bundle cap, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Bundle compressor: none or lz4
    #[arg(long, global = true, default_value = "none")]
    compressor: String,
    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata
    Info {
        ggpk: PathBuf,
    },
    /// List files recursively
    List {
        ggpk: PathBuf,
        #[arg(short, long)]
        prefix: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Extract a file or directory
    Extract {
        ggpk: PathBuf,
        path: String,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Replace one file's content from disk
    Replace {
        ggpk: PathBuf,
        path: String,
        file: PathBuf,
    },
    /// Replace every file that has a counterpart under a directory
    Patch {
        ggpk: PathBuf,
        dir:  PathBuf,
    },
    /// Move records into free space and trim the file
    Defrag {
        ggpk: PathBuf,
    },
    /// List the files of a bundle index
    BundleList {
        index: PathBuf,
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Extract a file or directory from a bundle index
    BundleExtract {
        index: PathBuf,
        path:  String,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Replace indexed files from a directory
    BundlePatch {
        index: PathBuf,
        dir:   PathBuf,
    },
}

#[derive(Serialize)]
struct ListEntry {
    path:   String,
    size:   u32,
    sha256: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let options = match &cli.config {
        Some(path) => StoreOptions::from_json_file(path)?,
        None       => StoreOptions::default(),
    };
    let compressor: Arc<dyn Compressor> = Arc::from(get_compressor(&cli.compressor)?);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { ggpk } => {
            let g = Ggpk::open_read_only(&ggpk)?;
            let header = g.header();
            println!("── GGPK ─────────────────────────────────────────────────");
            println!("  Path           {}", ggpk.display());
            println!("  Version        {}", header.version);
            println!("  Root offset    {}", header.root_offset);
            println!("  Free regions   {}", g.free_list().len());
            println!("  Free bytes     {}", g.free_list().total_bytes());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { ggpk, prefix, json } => {
            let mut g = Ggpk::open_read_only(&ggpk)?;
            let mut entries = Vec::new();
            for id in g.all_nodes()? {
                let Some(file) = g.node(id).as_file() else { continue };
                let path = g.path_of(id);
                if prefix.as_deref().map_or(true, |p| path.starts_with(p)) {
                    entries.push(ListEntry { path, size: file.data_length, sha256: hex::encode(file.hash) });
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{:<60} {:>12}  SHA-256", "Path", "Size");
                for e in &entries {
                    println!("{:<60} {:>12}  {}", e.path, e.size, &e.sha256[..12]);
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { ggpk, path, output } => {
            let mut g = Ggpk::open_read_only(&ggpk)?;
            let id = g.find(&path, None)?.ok_or_else(|| ggpack::Error::not_found(path.as_str()))?;
            let dest = output.join(g.node(id).name());
            let n = g.extract(id, &dest)?;
            println!("Extracted {} file(s) to {}", n, dest.display());
        }

        // ── Replace ──────────────────────────────────────────────────────────
        Commands::Replace { ggpk, path, file } => {
            let mut g = Ggpk::open(&ggpk)?;
            let id = g.find_file(&path)?;
            g.replace(id, &file)?;
            let sha256 = g.node(id).as_file().map(|f| hex::encode(&f.hash[..6])).unwrap_or_default();
            println!("Replaced {} ({})", path, sha256);
        }

        // ── Patch ────────────────────────────────────────────────────────────
        Commands::Patch { ggpk, dir } => {
            let mut g = Ggpk::open(&ggpk)?;
            let n = g.patch_from_dir(&dir)?;
            println!("Replaced {} file(s)", n);
        }

        // ── Defrag ───────────────────────────────────────────────────────────
        Commands::Defrag { ggpk } => {
            let mut g = Ggpk::open(&ggpk)?;
            let before = g.free_list().total_bytes();
            let moved = g.defragment(|n| {
                eprint!("\r  moved {} record(s)", n);
                let _ = std::io::stderr().flush();
            })?;
            eprintln!();
            println!(
                "Moved {} record(s); free bytes {} -> {}",
                moved,
                before,
                g.free_list().total_bytes()
            );
        }

        // ── Bundle index ─────────────────────────────────────────────────────
        Commands::BundleList { index, prefix } => {
            let idx = open_index(&index, compressor, options, false)?;
            println!("{:<60} {:>10}  Bundle", "Path", "Size");
            for f in idx.files() {
                let Some(path) = f.path() else { continue };
                if prefix.as_deref().map_or(true, |p| path.starts_with(p)) {
                    println!("{:<60} {:>10}  {}", path, f.size, idx.bundles()[f.bundle_index].path);
                }
            }
        }

        Commands::BundleExtract { index, path, output } => {
            let idx = open_index(&index, compressor, options, false)?;
            let node = idx.find_node(&path).ok_or_else(|| ggpack::Error::not_found(path.as_str()))?;
            let dest = if node == PathTree::<usize>::ROOT {
                output
            } else {
                output.join(&idx.tree().node(node).name)
            };
            let mut bundles = DirectoryBundles::read_only(bundles_dir(&index));
            let n = idx.extract(&mut bundles, node, &dest)?;
            println!("Extracted {} file(s) to {}", n, dest.display());
        }

        Commands::BundlePatch { index, dir } => {
            let mut idx = open_index(&index, compressor, options, true)?;
            let mut bundles = DirectoryBundles::new(bundles_dir(&index));
            let n = idx.patch_from_dir(&mut bundles, &dir)?;
            println!("Replaced {} file(s)", n);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_index(
    path: &Path,
    compressor: Arc<dyn Compressor>,
    options: StoreOptions,
    writable: bool,
) -> Result<Index<File>, Box<dyn std::error::Error>> {
    let file = std::fs::OpenOptions::new().read(true).write(writable).open(path)?;
    Ok(Index::open(file, compressor, options)?)
}

fn bundles_dir(index: &Path) -> PathBuf {
    index.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}
