use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thumbcache::config::{self, ServiceConfig};
use thumbcache::downloader::HttpDownloader;
use thumbcache::error::{ErrorResponse, ThumbnailError};
use thumbcache::locker::FileLocker;
use thumbcache::output;
use thumbcache::request::ThumbnailRequest;
use thumbcache::service::{Service, Thumbnail};
use thumbcache::store::FsStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thumbcache")]
#[command(about = "Letterboxed JPEG thumbnails with a shared, coalescing cache")]
#[command(long_about = "\
Letterboxed JPEG thumbnails with a shared, coalescing cache

The source image is downloaded, scaled down to fit the requested box, centered
on a black background, and encoded as JPEG. Results are stored under a
fingerprint of the source bytes and the box size, so repeated requests are
served from the store.

Processes that share the store and lock directories coordinate: when several
ask for the same thumbnail at once, one computes it and the others wait for
the stored result.

Logging is controlled with RUST_LOG (default: thumbcache=info).

Run 'thumbcache gen-config' to generate a documented thumbcache.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = stock defaults)
    #[arg(long, default_value = "thumbcache.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Produce one thumbnail and write it to a file
    Thumbnail {
        /// Source image URL
        #[arg(long)]
        url: String,
        /// Box width in pixels
        #[arg(long)]
        width: String,
        /// Box height in pixels
        #[arg(long)]
        height: String,
        /// Where to write the JPEG
        #[arg(long, default_value = "thumbnail.jpg")]
        output: PathBuf,
    },
    /// Produce several sizes of one source in parallel
    Batch {
        /// Source image URL
        #[arg(long)]
        url: String,
        /// Box size as WIDTHxHEIGHT; repeat for more sizes
        #[arg(long = "size", required = true, value_parser = parse_size)]
        sizes: Vec<(u32, u32)>,
    },
    /// Print a stock thumbcache.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Thumbnail {
            url,
            width,
            height,
            output: path,
        } => {
            let config = config::load_config(&cli.config)?;
            let service = build_service(&config)?;

            let result = ThumbnailRequest::parse(&url, &width, &height, config.limits.max_area)
                .and_then(|req| {
                    service
                        .perform_detailed(req.url.as_str(), &req.transformation())
                        .map(|thumb| (req, thumb))
                });

            match result {
                Ok((req, thumb)) => {
                    std::fs::write(&path, &thumb.bytes)?;
                    output::print_thumbnail(req.width, req.height, &thumb, &path);
                }
                Err(err) => return Ok(report_failure(&err)),
            }
        }
        Command::Batch { url, sizes } => {
            let config = config::load_config(&cli.config)?;
            let service = build_service(&config)?;
            let max_area = config.limits.max_area;

            let results: Vec<((u32, u32), Result<Thumbnail, ThumbnailError>)> = sizes
                .par_iter()
                .map(|&(w, h)| {
                    let result =
                        ThumbnailRequest::parse(&url, &w.to_string(), &h.to_string(), max_area)
                            .and_then(|req| {
                                service.perform_detailed(req.url.as_str(), &req.transformation())
                            });
                    ((w, h), result)
                })
                .collect();

            output::print_batch(&url, &results);
            if results.iter().any(|(_, r)| r.is_err()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr so stdout carries only command output.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("thumbcache=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Filesystem store and lock directory, so separate invocations coordinate.
fn build_service(config: &ServiceConfig) -> Result<Service, Box<dyn std::error::Error>> {
    let store = FsStore::open(&config.store.dir)?;
    let locker = FileLocker::open(&config.lock.dir, config.lock.options())?;
    let downloader = HttpDownloader::new(
        config.download.allowed_content_types.iter().cloned(),
        config.download.timeout(),
    )?;

    Ok(Service::new(
        Arc::new(downloader),
        Arc::new(store),
        Arc::new(locker),
        config.coalescing.settings(),
    ))
}

/// Print the rendered error document and pick an exit code.
fn report_failure(err: &ThumbnailError) -> ExitCode {
    tracing::error!(status = err.status(), error = %err, "thumbnail request failed");
    let response = ErrorResponse::from_error(err);
    eprintln!("{}", response.body);
    ExitCode::FAILURE
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w = w.trim().parse().map_err(|_| format!("invalid width in {s:?}"))?;
    let h = h.trim().parse().map_err(|_| format!("invalid height in {s:?}"))?;
    Ok((w, h))
}
