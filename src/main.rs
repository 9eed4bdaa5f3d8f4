pub mod config;
pub mod http;
pub mod index;
pub mod mirror;
pub mod run;
pub mod server;
pub mod site;
pub mod types;
pub mod version;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};

use crate::config::{IndexSource, MirrorConfig};
use crate::http::RetryPolicy;
use crate::mirror::MirrorPaths;
use crate::server::ManifestServer;

#[derive(Parser)]
#[command(
    name = "elmirror",
    about = "Mirror Elm package repositories and publish release zipballs and manifests"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RootArgs {
    /// Destination directory for mirrors and artifacts
    #[arg(
        short,
        long = "destination-directory",
        env = "ELMIRROR_ROOT",
        default_value = config::DEFAULT_ROOT
    )]
    destination: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one mirror pass over the package index
    Sync {
        #[command(flatten)]
        root: RootArgs,

        /// Read the package index from a local file instead of fetching it
        #[arg(short = 'i', long)]
        override_index: Option<PathBuf>,

        /// Package index URL
        #[arg(short = 'p', long, default_value = config::DEFAULT_INDEX_URL)]
        package_index_url: String,

        /// Base URL that repository names are appended to
        #[arg(long, default_value = config::DEFAULT_REMOTE_BASE)]
        remote_base: String,

        /// Number of packages processed in parallel
        #[arg(short, long, default_value_t = config::DEFAULT_JOBS)]
        jobs: usize,

        /// Retries for transient HTTP failures
        #[arg(long, default_value_t = RetryPolicy::default().max_retries)]
        max_retries: u32,
    },

    /// Serve extracted manifests over HTTP
    Serve {
        #[command(flatten)]
        root: RootArgs,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        listen: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Sync {
            root,
            override_index,
            package_index_url,
            remote_base,
            jobs,
            max_retries,
        } => {
            let index = match override_index {
                Some(path) => IndexSource::File(path),
                None => IndexSource::Remote(package_index_url),
            };
            cmd_sync(MirrorConfig {
                root: root.destination,
                index,
                remote_base,
                jobs,
                retry: RetryPolicy {
                    max_retries,
                    ..RetryPolicy::default()
                },
            })
        }
        Commands::Serve { root, listen } => cmd_serve(root.destination, &listen),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_sync(config: MirrorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, finishing packages in progress");
        stop_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("Failed to set signal handler: {}", e))?;

    run::sync(&config, &stop)?;
    Ok(())
}

fn cmd_serve(root: PathBuf, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = ManifestServer::bind(listen, MirrorPaths::new(root))?;
    let addr = server.local_addr()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
        server::wake(addr);
    })
    .map_err(|e| format!("Failed to set signal handler: {}", e))?;

    server.serve(&shutdown)?;
    Ok(())
}
