//! Two-phase capture orchestration.
//!
//! Phase 1 walks the frontier breadth-first, renders each page, writes
//! the raw HTML, and downloads its assets, building the manifest as it
//! goes. Phase 2 replays the captured pages through the rewriter and
//! sanitizer using the completed manifest, so every page is rewritten
//! against the full picture of what was actually captured.

use chrono::Local;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::assets::{self, AssetDownloader};
use crate::config::Config;
use crate::discover::{Frontier, SitemapSeeder};
use crate::events::{EventBus, ProgressEvent, RunStats};
use crate::manifest::{EntryKind, Manifest, ManifestEntry, ManifestError};
use crate::paths::{PathAllocator, PathKind};
use crate::render::{FetchClient, FetchError, Renderer};
use crate::rewrite::PageRewriter;
use crate::sanitize::{SanitizationReport, Sanitizer};
use crate::url_norm::{self, RefScope};

pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const SANITIZATION_REPORT_FILENAME: &str = "sanitization_report.json";
pub const STATS_FILENAME: &str = "run_stats.json";

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid seed URL: {0}")]
    InvalidSeed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Sanitization error: {0}")]
    Sanitize(#[from] crate::sanitize::SanitizeError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] FetchError),

    #[error("No pages captured; the seed page could not be rendered")]
    NothingCaptured,
}

/// Shared mutable state of a running capture: the path allocator and
/// the manifest it feeds. All allocation and manifest mutation happens
/// under one lock so concurrent asset downloads stay deterministic.
#[derive(Debug, Default)]
pub struct Ledger {
    pub allocator: PathAllocator,
    pub manifest: Manifest,
}

/// Per-run settings. Timeouts and worker counts default from [`Config`]
/// and are overridable per invocation.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub seed: String,
    pub output_root: PathBuf,
    /// Stop scheduling new pages once this many have been attempted.
    pub max_pages: Option<usize>,
    pub render_timeout_secs: u64,
    pub politeness_delay_ms: u64,
    pub download_workers: usize,
    pub user_agent: String,
}

impl MirrorConfig {
    pub fn new(seed: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            seed: seed.into(),
            output_root: output_root.into(),
            max_pages: None,
            render_timeout_secs: Config::RENDER_TIMEOUT_SECS,
            politeness_delay_ms: Config::POLITENESS_DELAY_MS,
            download_workers: Config::DOWNLOAD_WORKERS,
            user_agent: Config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct MirrorOutcome {
    pub run_dir: PathBuf,
    pub stats: RunStats,
}

/// One site capture. Owns the frontier, ledger, and event bus for the
/// duration of a run; `stop()` requests a graceful halt after which
/// everything captured so far is still persisted and rewritten.
pub struct Mirror {
    config: MirrorConfig,
    renderer: Arc<dyn Renderer>,
    events: EventBus,
    running: Arc<Mutex<bool>>,
}

impl Mirror {
    pub fn new(config: MirrorConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            config,
            renderer,
            events: EventBus::new(),
            running: Arc::new(Mutex::new(true)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Request a graceful stop. The current page finishes, the manifest
    /// is saved, and phase 2 runs over the pages captured so far.
    pub fn stop(&self) {
        *self.running.lock() = false;
        tracing::info!("Stop requested; finishing current page");
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub async fn run(&self) -> Result<MirrorOutcome, MirrorError> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Subscribers get a terminal event for every outcome,
                // fatal filesystem failures included.
                self.events.emit(ProgressEvent::RunFailed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<MirrorOutcome, MirrorError> {
        let started = Instant::now();

        let seed_url = Url::parse(&url_norm::normalize_url_for_cli(&self.config.seed))
            .map_err(|e| MirrorError::InvalidSeed(format!("{}: {}", self.config.seed, e)))?;
        let seed_host = url_norm::extract_host(seed_url.as_str())
            .ok_or_else(|| MirrorError::InvalidSeed(self.config.seed.clone()))?;
        let canonical_seed = url_norm::canonical_page_url(&seed_url, seed_url.as_str())
            .ok_or_else(|| MirrorError::InvalidSeed(self.config.seed.clone()))?;

        let run_dir = self.create_run_dir(&seed_host)?;
        tracing::info!("Capturing {} into {}", canonical_seed, run_dir.display());

        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let mut frontier = Frontier::new();
        frontier.add(canonical_seed.clone(), 0);
        self.events.emit(ProgressEvent::PageDiscovered {
            url: canonical_seed.to_string(),
            depth: 0,
        });

        self.seed_from_sitemap(&canonical_seed, &seed_host, &mut frontier)
            .await?;

        let mut stats = self
            .capture_phase(&seed_host, &mut frontier, &ledger, &run_dir)
            .await?;

        // Phase 1 is done; no other holder of the ledger remains.
        let Ledger { manifest, .. } = std::mem::take(&mut *ledger.lock());
        if manifest.pages().next().is_none() {
            return Err(MirrorError::NothingCaptured);
        }
        manifest.save(run_dir.join(MANIFEST_FILENAME), canonical_seed.as_str())?;

        let report = self.rewrite_phase(&manifest, &seed_host, &run_dir).await?;
        stats.elements_removed = report.total_removed();
        report.save(run_dir.join(SANITIZATION_REPORT_FILENAME))?;

        stats.duration_secs = started.elapsed().as_secs();
        std::fs::write(
            run_dir.join(STATS_FILENAME),
            serde_json::to_string_pretty(&stats)?,
        )?;
        self.events
            .emit(ProgressEvent::RunCompleted { stats: stats.clone() });
        tracing::info!("Run complete: {}", stats);

        Ok(MirrorOutcome { run_dir, stats })
    }

    /// Runs directory layout: `<output_root>/<host>/<timestamp>/`.
    /// Every invocation gets a fresh directory; nothing is overwritten.
    fn create_run_dir(&self, seed_host: &str) -> Result<PathBuf, MirrorError> {
        let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let run_dir = self.config.output_root.join(seed_host).join(run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    /// Pre-seed the frontier from the site's sitemap. Sitemap-seeded
    /// pages have no link path from the seed yet, so their depth is
    /// taken from their URL structure instead.
    async fn seed_from_sitemap(
        &self,
        seed: &Url,
        seed_host: &str,
        frontier: &mut Frontier,
    ) -> Result<(), MirrorError> {
        let http = FetchClient::new(&self.config.user_agent, Config::SITEMAP_TIMEOUT_SECS)?;
        let seeder = SitemapSeeder::new(http);

        for raw in seeder.seed(seed).await {
            if let RefScope::Page(url) = url_norm::classify(&raw, seed, seed_host) {
                let depth = path_segment_depth(&url);
                if frontier.add(url.clone(), depth) {
                    self.events.emit(ProgressEvent::PageDiscovered {
                        url: url.to_string(),
                        depth,
                    });
                }
            }
        }
        Ok(())
    }

    /// Phase 1: render pages breadth-first, persist raw HTML, download
    /// assets, and grow the manifest.
    async fn capture_phase(
        &self,
        seed_host: &str,
        frontier: &mut Frontier,
        ledger: &Arc<Mutex<Ledger>>,
        run_dir: &Path,
    ) -> Result<RunStats, MirrorError> {
        let fetch = FetchClient::new(&self.config.user_agent, Config::DOWNLOAD_TIMEOUT_SECS)?;
        let downloader = AssetDownloader::new(fetch, self.config.download_workers);
        let render_timeout = Duration::from_secs(self.config.render_timeout_secs);

        let mut stats = RunStats::default();
        let mut attempted = 0usize;

        while let Some(target) = frontier.next() {
            if !self.is_running() {
                tracing::info!("Capture stopped with {} targets pending", frontier.pending_count());
                break;
            }
            if let Some(max) = self.config.max_pages {
                if attempted >= max {
                    tracing::info!("Page limit {} reached", max);
                    break;
                }
            }

            if attempted > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.politeness_delay_ms)).await;
            }
            attempted += 1;

            tracing::debug!("Rendering {} (depth {})", target.url, target.depth);
            let rendering = match self.renderer.render(target.url.as_str(), render_timeout).await {
                Ok(rendering) => rendering,
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!("Render failed for {} (transient): {}", target.url, e);
                    } else {
                        tracing::warn!("Render failed for {}: {}", target.url, e);
                    }
                    frontier.mark_failed(&target.url);
                    stats.pages_failed += 1;
                    self.events.emit(ProgressEvent::PageFetched {
                        url: target.url.to_string(),
                        ok: false,
                        reason: Some(e.to_string()),
                    });
                    continue;
                }
            };

            frontier.mark_fetched(&target.url);
            self.events.emit(ProgressEvent::PageFetched {
                url: target.url.to_string(),
                ok: true,
                reason: None,
            });

            // Allocate and persist the page before its assets so a
            // crash mid-batch never leaves assets without their page.
            let local_path = {
                let mut guard = ledger.lock();
                let allocation = guard.allocator.allocate(PathKind::Page, &target.url);
                let entry = ManifestEntry {
                    remote: target.url.as_str().to_string(),
                    local: allocation.local_path.clone(),
                    kind: EntryKind::Page,
                    depth: Some(target.depth),
                    demoted: allocation.demoted,
                };
                if let Err(e) = guard.manifest.insert(entry) {
                    tracing::warn!("Manifest insert failed for {}: {}", target.url, e);
                    stats.pages_failed += 1;
                    continue;
                }
                allocation.local_path
            };

            assets::write_atomic(&run_dir.join(&local_path), rendering.html.as_bytes()).await?;
            stats.pages_captured += 1;
            stats.bytes_written += rendering.html.len() as u64;

            let mut asset_refs = rendering.asset_refs;
            for raw in &rendering.links {
                match url_norm::classify(raw, &target.url, seed_host) {
                    RefScope::Page(url) => {
                        let depth = target.depth + 1;
                        if frontier.add(url.clone(), depth) {
                            self.events.emit(ProgressEvent::PageDiscovered {
                                url: url.to_string(),
                                depth,
                            });
                        }
                    }
                    // Documents behind plain anchors (.pdf, .zip) are
                    // downloads, not pages to crawl.
                    RefScope::Asset(_) => asset_refs.push(raw.clone()),
                    RefScope::External | RefScope::Skip => {}
                }
            }

            let batch = downloader
                .download_page_assets(
                    &target.url,
                    &asset_refs,
                    seed_host,
                    ledger,
                    run_dir,
                    &self.events,
                )
                .await?;
            stats.assets_downloaded += batch.downloaded;
            stats.assets_failed += batch.failed;
            stats.bytes_written += batch.bytes;
        }

        Ok(stats)
    }

    /// Phase 2: rewrite and sanitize every captured page in place.
    /// Per-page failures are logged and leave the raw capture intact.
    async fn rewrite_phase(
        &self,
        manifest: &Manifest,
        seed_host: &str,
        run_dir: &Path,
    ) -> Result<SanitizationReport, MirrorError> {
        let rewriter = PageRewriter::new(manifest, seed_host);
        let sanitizer = Sanitizer::new();
        let mut report = SanitizationReport::default();

        for entry in manifest.pages() {
            let page_path = run_dir.join(&entry.local);
            let html = match tokio::fs::read_to_string(&page_path).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("Cannot read captured page {}: {}", page_path.display(), e);
                    continue;
                }
            };

            let page_url = match Url::parse(&entry.remote) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Bad manifest remote {}: {}", entry.remote, e);
                    continue;
                }
            };
            let depth = local_dir_depth(&entry.local);

            let rewritten = match rewriter.rewrite(&html, &page_url, depth) {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    tracing::warn!("Rewrite failed for {}: {}", entry.remote, e);
                    continue;
                }
            };
            self.events.emit(ProgressEvent::PageRewritten {
                url: entry.remote.clone(),
            });

            let (sanitized, stats) = match sanitizer.sanitize(&rewritten) {
                Ok(out) => out,
                Err(e) => {
                    tracing::warn!("Sanitization failed for {}: {}", entry.remote, e);
                    continue;
                }
            };
            self.events.emit(ProgressEvent::PageSanitized {
                url: entry.remote.clone(),
                removed: stats.total(),
            });
            report.record(&entry.remote, stats);

            assets::write_atomic(&page_path, sanitized.as_bytes()).await?;
        }

        Ok(report)
    }

    /// Re-run phase 2 over an existing run directory using its saved
    /// manifest. Useful after tweaking the sanitizer, but note the raw
    /// captures were already overwritten; rewriting is idempotent so
    /// this is safe, it just cannot resurrect removed elements.
    pub async fn rewrite_existing(&self, run_dir: &Path) -> Result<RunStats, MirrorError> {
        let started = Instant::now();
        let (manifest, seed) = Manifest::load(run_dir.join(MANIFEST_FILENAME))?;
        let seed_host = url_norm::extract_host(&seed)
            .ok_or_else(|| MirrorError::InvalidSeed(seed.clone()))?;

        let report = self.rewrite_phase(&manifest, &seed_host, run_dir).await?;
        report.save(run_dir.join(SANITIZATION_REPORT_FILENAME))?;

        let stats = RunStats {
            pages_captured: manifest.pages().count(),
            elements_removed: report.total_removed(),
            duration_secs: started.elapsed().as_secs(),
            ..RunStats::default()
        };
        self.events
            .emit(ProgressEvent::RunCompleted { stats: stats.clone() });
        Ok(stats)
    }
}

/// Discovery-depth proxy for pages found without a link path (sitemap
/// seeding): the number of URL path segments.
fn path_segment_depth(url: &Url) -> u32 {
    url.path().split('/').filter(|s| !s.is_empty()).count() as u32
}

/// Directory depth of a page file inside the run directory. The
/// rewrite prefix must climb exactly this many levels to reach the run
/// root, regardless of how few links it took to discover the page.
fn local_dir_depth(local: &str) -> u32 {
    local.matches('/').count() as u32
}
