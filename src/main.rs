mod assets;
mod cli;
mod config;
mod discover;
mod events;
mod logging;
mod manifest;
mod paths;
mod pipeline;
mod render;
mod rewrite;
mod sanitize;
mod url_norm;

use std::path::PathBuf;
use std::sync::Arc;

use cli::{Cli, Commands};
use config::Config;
use events::ProgressEvent;
use pipeline::{Mirror, MirrorConfig, MirrorError};
use render::{FetchClient, HttpRenderer};

fn exit_code(err: &MirrorError) -> i32 {
    match err {
        MirrorError::InvalidSeed(_) => 2,
        MirrorError::Io(_)
        | MirrorError::Manifest(_)
        | MirrorError::Sanitize(_)
        | MirrorError::Serde(_) => 3,
        MirrorError::Client(_) | MirrorError::NothingCaptured => 4,
    }
}

/// Translate the event stream into terminal progress lines.
fn spawn_event_printer(mirror: &Mirror) -> tokio::task::JoinHandle<()> {
    let mut rx = mirror.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                ProgressEvent::PageFetched { url, ok: true, .. } => {
                    println!("  captured {}", url);
                }
                ProgressEvent::PageFetched { url, ok: false, reason } => {
                    println!("  failed   {} ({})", url, reason.unwrap_or_default());
                }
                ProgressEvent::PageSanitized { url, removed } if removed > 0 => {
                    println!("  cleaned  {} ({} elements)", url, removed);
                }
                ProgressEvent::RunCompleted { stats } => {
                    println!("Done: {}", stats);
                }
                ProgressEvent::RunFailed { reason } => {
                    println!("Run failed: {}", reason);
                }
                _ => {}
            }
        }
    })
}

fn spawn_signal_handler(mirror: Arc<Mirror>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nReceived Ctrl+C, finishing current page and saving...");
            mirror.stop();
        }
    })
}

async fn run_mirror_command(
    url: String,
    output: String,
    max_pages: Option<usize>,
    render_timeout: u64,
    delay: u64,
    workers: usize,
    user_agent: Option<String>,
) -> Result<(), MirrorError> {
    let mut config = MirrorConfig::new(url, output);
    config.max_pages = max_pages;
    config.render_timeout_secs = render_timeout;
    config.politeness_delay_ms = delay;
    config.download_workers = workers;
    if let Some(ua) = user_agent {
        config.user_agent = ua;
    }

    println!(
        "Mirroring {} ({} asset workers, {}s render timeout)",
        config.seed, config.download_workers, config.render_timeout_secs
    );

    let fetch = FetchClient::new(&config.user_agent, config.render_timeout_secs)?;
    let renderer = Arc::new(HttpRenderer::new(fetch));
    let mirror = Arc::new(Mirror::new(config, renderer));

    let _printer = spawn_event_printer(&mirror);
    let _signal = spawn_signal_handler(Arc::clone(&mirror));

    let outcome = mirror.run().await?;
    println!("Mirror saved to {}", outcome.run_dir.display());

    Ok(())
}

async fn run_rewrite_command(run_dir: String) -> Result<(), MirrorError> {
    let run_path = PathBuf::from(&run_dir);
    println!("Rewriting captured pages in {}", run_dir);

    // The seed in the manifest drives rewriting; the config seed is
    // only a placeholder here.
    let config = MirrorConfig::new("https://localhost/", run_path.parent().unwrap_or(&run_path));
    let fetch = FetchClient::new(Config::DEFAULT_USER_AGENT, Config::RENDER_TIMEOUT_SECS)?;
    let mirror = Mirror::new(config, Arc::new(HttpRenderer::new(fetch)));

    let _printer = spawn_event_printer(&mirror);
    let stats = mirror.rewrite_existing(&run_path).await?;
    println!(
        "Rewrote {} pages, removed {} elements",
        stats.pages_captured, stats.elements_removed
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Mirror {
            url,
            output,
            max_pages,
            render_timeout,
            delay,
            workers,
            user_agent,
        } => {
            if let Err(e) = logging::init_logging_in_output_dir(&output) {
                eprintln!("Failed to initialize logging: {}", e);
                std::process::exit(3);
            }
            run_mirror_command(
                url,
                output,
                max_pages,
                render_timeout,
                delay,
                workers,
                user_agent,
            )
            .await
        }
        Commands::Rewrite { run_dir } => {
            if let Err(e) = logging::init_logging_in_output_dir(&run_dir) {
                eprintln!("Failed to initialize logging: {}", e);
                std::process::exit(3);
            }
            run_rewrite_command(run_dir).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}
