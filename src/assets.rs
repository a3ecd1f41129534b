//! Asset discovery and download.
//!
//! Scans rendered HTML for reference-bearing attributes, classifies
//! each reference by extension heuristic, downloads in-domain assets
//! exactly once, and registers their local paths through the shared
//! ledger.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

use crate::events::{EventBus, ProgressEvent};
use crate::manifest::{EntryKind, ManifestEntry};
use crate::paths::PathKind;
use crate::pipeline::Ledger;
use crate::render::{FetchClient, FetchError};
use crate::url_norm::{self, RefScope};

/// Framework-conventional data attributes used for lazy-loaded media.
pub const LAZY_DATA_ATTRS: &[&str] = &[
    "data-src",
    "data-srcset",
    "data-original",
    "data-lazy-src",
    "data-url",
    "data-bg",
];

lazy_static! {
    /// `url(...)` occurrences inside inline style attributes and
    /// `<style>` blocks.
    pub static ref CSS_URL_RE: Regex =
        Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("Invalid css url regex");
}

/// One `srcset` value-descriptor pair. The descriptor (`300w`, `2x`)
/// is carried through rewriting untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcsetEntry {
    pub url: String,
    pub descriptor: Option<String>,
}

/// Split a `srcset` attribute into its entries. Each comma-separated
/// entry is `<url> [descriptor]`.
pub fn split_srcset(srcset: &str) -> Vec<SrcsetEntry> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?.to_string();
            if url.is_empty() {
                return None;
            }
            let descriptor = parts.next().map(|s| s.to_string());
            Some(SrcsetEntry { url, descriptor })
        })
        .collect()
}

pub fn join_srcset(entries: &[SrcsetEntry]) -> String {
    entries
        .iter()
        .map(|e| match &e.descriptor {
            Some(d) => format!("{} {}", e.url, d),
            None => e.url.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extract every raw asset reference string from a rendering, in
/// document order: `src`, stylesheet/icon `href`s, `srcset` entries,
/// `poster`, lazy-load data attributes, and inline-style `url(...)`.
pub fn extract_asset_refs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut refs = Vec::new();

    let src_sel = Selector::parse("img[src], script[src], source[src], video[src], audio[src], embed[src]")
        .expect("Invalid selector");
    for element in document.select(&src_sel) {
        if let Some(src) = element.value().attr("src") {
            refs.push(src.trim().to_string());
        }
    }

    let link_sel = Selector::parse("link[href]").expect("Invalid selector");
    for element in document.select(&link_sel) {
        if let Some(href) = element.value().attr("href") {
            refs.push(href.trim().to_string());
        }
    }

    let srcset_sel = Selector::parse("img[srcset], source[srcset]").expect("Invalid selector");
    for element in document.select(&srcset_sel) {
        if let Some(srcset) = element.value().attr("srcset") {
            for entry in split_srcset(srcset) {
                refs.push(entry.url);
            }
        }
    }

    let poster_sel = Selector::parse("video[poster]").expect("Invalid selector");
    for element in document.select(&poster_sel) {
        if let Some(poster) = element.value().attr("poster") {
            refs.push(poster.trim().to_string());
        }
    }

    let all_sel = Selector::parse("*").expect("Invalid selector");
    for element in document.select(&all_sel) {
        for attr in LAZY_DATA_ATTRS {
            if let Some(value) = element.value().attr(attr) {
                if attr.ends_with("srcset") {
                    for entry in split_srcset(value) {
                        refs.push(entry.url);
                    }
                } else if !value.trim().is_empty() {
                    refs.push(value.trim().to_string());
                }
            }
        }
        if let Some(style) = element.value().attr("style") {
            for cap in CSS_URL_RE.captures_iter(style) {
                refs.push(cap[1].to_string());
            }
        }
    }

    let style_sel = Selector::parse("style").expect("Invalid selector");
    for element in document.select(&style_sel) {
        let css: String = element.text().collect();
        for cap in CSS_URL_RE.captures_iter(&css) {
            refs.push(cap[1].to_string());
        }
    }

    refs
}

/// Counters for one page's asset batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetBatchStats {
    pub downloaded: usize,
    pub failed: usize,
    pub bytes: u64,
}

struct DownloadJob {
    canonical: String,
    without_query: String,
    local_path: String,
    demoted: bool,
}

enum DownloadOutcome {
    Written(u64),
    FetchFailed(FetchError),
    Filesystem(std::io::Error),
}

/// Downloads a page's assets with a bounded worker pool. Path
/// allocation is funneled through the ledger lock so it stays
/// collision-free and deterministic; manifest entries are inserted
/// only after the bytes are safely on disk.
pub struct AssetDownloader {
    fetch: FetchClient,
    max_workers: usize,
}

impl AssetDownloader {
    pub fn new(fetch: FetchClient, max_workers: usize) -> Self {
        Self { fetch, max_workers: max_workers.max(1) }
    }

    pub async fn download_page_assets(
        &self,
        page_url: &Url,
        asset_refs: &[String],
        seed_host: &str,
        ledger: &Arc<parking_lot::Mutex<Ledger>>,
        run_dir: &Path,
        events: &EventBus,
    ) -> Result<AssetBatchStats, std::io::Error> {
        let jobs = self.collect_jobs(page_url, asset_refs, seed_host, ledger);
        if jobs.is_empty() {
            return Ok(AssetBatchStats::default());
        }

        let mut outcomes: Vec<Option<DownloadOutcome>> = Vec::new();
        outcomes.resize_with(jobs.len(), || None);

        let mut in_flight: JoinSet<(usize, DownloadOutcome)> = JoinSet::new();
        let mut next_job = 0;

        loop {
            while next_job < jobs.len() && in_flight.len() < self.max_workers {
                let idx = next_job;
                next_job += 1;
                let fetch = self.fetch.clone();
                let url = jobs[idx].canonical.clone();
                let target = run_dir.join(&jobs[idx].local_path);
                in_flight.spawn(async move {
                    (idx, Self::download_one(&fetch, &url, &target).await)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((idx, outcome))) => outcomes[idx] = Some(outcome),
                Some(Err(e)) => {
                    tracing::error!("Download task join error: {}", e);
                }
                None => break,
            }
        }

        // Register successes in allocation order so the manifest is
        // reproducible for the same input sequence.
        let mut stats = AssetBatchStats::default();
        let mut guard = ledger.lock();
        for (job, outcome) in jobs.iter().zip(outcomes.into_iter()) {
            match outcome {
                Some(DownloadOutcome::Written(bytes)) => {
                    let entry = ManifestEntry {
                        remote: job.canonical.clone(),
                        local: job.local_path.clone(),
                        kind: EntryKind::Asset,
                        depth: None,
                        demoted: job.demoted,
                    };
                    if let Err(e) = guard.manifest.insert(entry) {
                        tracing::warn!("Manifest insert failed for {}: {}", job.canonical, e);
                        continue;
                    }
                    guard
                        .manifest
                        .add_alias(job.without_query.clone(), job.canonical.clone());
                    stats.downloaded += 1;
                    stats.bytes += bytes;
                    events.emit(ProgressEvent::AssetDownloaded {
                        url: job.canonical.clone(),
                        bytes,
                    });
                }
                Some(DownloadOutcome::FetchFailed(e)) => {
                    // Non-fatal: the reference stays unrewritten and the
                    // page still captures.
                    tracing::warn!("Asset download failed for {}: {}", job.canonical, e);
                    stats.failed += 1;
                }
                Some(DownloadOutcome::Filesystem(e)) => {
                    // Output integrity cannot be guaranteed; abort the run.
                    return Err(e);
                }
                None => {
                    tracing::warn!("Asset download never completed for {}", job.canonical);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Normalize, deduplicate, and allocate paths for a page's asset
    /// references. Runs entirely under the ledger lock; allocation for
    /// a canonical URL happens exactly once per run.
    fn collect_jobs(
        &self,
        page_url: &Url,
        asset_refs: &[String],
        seed_host: &str,
        ledger: &Arc<parking_lot::Mutex<Ledger>>,
    ) -> Vec<DownloadJob> {
        let mut guard = ledger.lock();
        let mut jobs = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for raw in asset_refs {
            let canonical = match url_norm::classify(raw, page_url, seed_host) {
                RefScope::Asset(u) => u,
                // Page links flow through the discoverer; external and
                // pseudo references are never downloaded.
                _ => continue,
            };

            let key = canonical.as_str().to_string();
            if !seen.insert(key.clone()) || guard.manifest.contains(&key) {
                continue;
            }

            let allocation = guard.allocator.allocate(PathKind::Asset, &canonical);
            jobs.push(DownloadJob {
                without_query: url_norm::asset_url_without_query(&canonical).into(),
                canonical: key,
                local_path: allocation.local_path,
                demoted: allocation.demoted,
            });
        }

        jobs
    }

    /// Fetch one asset and write it atomically: bytes land in a
    /// temporary file that is renamed into place, so a partially
    /// written asset is never observable.
    async fn download_one(fetch: &FetchClient, url: &str, target: &Path) -> DownloadOutcome {
        let bytes = match fetch.fetch_bytes(url).await {
            Ok(bytes) => bytes,
            Err(e) => return DownloadOutcome::FetchFailed(e),
        };

        if let Err(e) = write_atomic(target, &bytes).await {
            return DownloadOutcome::Filesystem(e);
        }

        DownloadOutcome::Written(bytes.len() as u64)
    }
}

/// Write to a sibling temp file, then rename into place.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = target.with_extension("part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_srcset() {
        let entries = split_srcset("logo-300w.jpg 300w, logo-150w.jpg 150w");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "logo-300w.jpg");
        assert_eq!(entries[0].descriptor.as_deref(), Some("300w"));
        assert_eq!(entries[1].url, "logo-150w.jpg");
        assert_eq!(entries[1].descriptor.as_deref(), Some("150w"));
    }

    #[test]
    fn test_split_srcset_without_descriptor() {
        let entries = split_srcset("logo.jpg");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].descriptor, None);
    }

    #[test]
    fn test_join_srcset_round_trip() {
        let entries = split_srcset("a.jpg 1x, b.jpg 2x");
        assert_eq!(join_srcset(&entries), "a.jpg 1x, b.jpg 2x");
    }

    #[test]
    fn test_extract_src_and_link_refs() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/wp-content/theme.css?ver=6">
        </head><body>
            <img src="/wp-content/uploads/logo.jpg">
            <script src="/wp-includes/app.js"></script>
        </body></html>"#;

        let refs = extract_asset_refs(html);
        assert!(refs.contains(&"/wp-content/uploads/logo.jpg".to_string()));
        assert!(refs.contains(&"/wp-content/theme.css?ver=6".to_string()));
        assert!(refs.contains(&"/wp-includes/app.js".to_string()));
    }

    #[test]
    fn test_extract_srcset_entries_separately() {
        let html = r#"<img srcset="logo-300w.jpg 300w, logo-150w.jpg 150w" src="logo.jpg">"#;
        let refs = extract_asset_refs(html);
        assert!(refs.contains(&"logo-300w.jpg".to_string()));
        assert!(refs.contains(&"logo-150w.jpg".to_string()));
        assert!(refs.contains(&"logo.jpg".to_string()));
    }

    #[test]
    fn test_extract_lazy_data_attrs() {
        let html = r#"<img data-src="/uploads/lazy.jpg" src="placeholder.gif">"#;
        let refs = extract_asset_refs(html);
        assert!(refs.contains(&"/uploads/lazy.jpg".to_string()));
    }

    #[test]
    fn test_extract_inline_style_urls() {
        let html = r#"<div style="background-image: url('/uploads/bg.png')"></div>"#;
        let refs = extract_asset_refs(html);
        assert!(refs.contains(&"/uploads/bg.png".to_string()));
    }

    #[test]
    fn test_extract_style_block_urls() {
        let html = r#"<style>.hero { background: url("/uploads/hero.jpg") no-repeat; }</style>"#;
        let refs = extract_asset_refs(html);
        assert!(refs.contains(&"/uploads/hero.jpg".to_string()));
    }

    #[test]
    fn test_css_url_regex_variants() {
        for css in [
            "url(/a.png)",
            "url('/a.png')",
            "url(\"/a.png\")",
            "url( '/a.png' )",
        ] {
            let cap = CSS_URL_RE.captures(css).unwrap();
            assert_eq!(&cap[1], "/a.png");
        }
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("wp-content/uploads/x.bin");
        write_atomic(&target, b"bytes").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"bytes");
        // No leftover temp file
        assert!(!target.with_extension("part").exists());
    }
}
