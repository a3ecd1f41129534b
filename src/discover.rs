//! Page discovery: the frontier of targets to capture, seeded from a
//! sitemap when one exists and supplemented with in-domain links found
//! during rendering.

use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use url::Url;

use crate::render::FetchClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Pending,
    Fetched,
    Failed,
}

/// One page scheduled for capture. Unique per canonical URL; created
/// on first discovery, never deleted.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub url: Url,
    /// Shortest link-distance from the seed; fixed at first discovery.
    pub depth: u32,
    pub status: TargetStatus,
}

/// BFS frontier keyed by canonical URL. Re-discovering a known URL is
/// a no-op, which both deduplicates work and breaks link cycles.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<String>,
    targets: HashMap<String, CrawlTarget>,
}

impl Frontier {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), targets: HashMap::new() }
    }

    /// Add a canonical URL at the given depth. Returns true when the
    /// URL was new; later discoveries of the same URL neither re-queue
    /// nor update the recorded depth.
    pub fn add(&mut self, url: Url, depth: u32) -> bool {
        let key = url.as_str().to_string();
        if self.targets.contains_key(&key) {
            return false;
        }
        self.targets.insert(
            key.clone(),
            CrawlTarget { url, depth, status: TargetStatus::Pending },
        );
        self.queue.push_back(key);
        true
    }

    /// Next pending target, breadth-first.
    pub fn next(&mut self) -> Option<CrawlTarget> {
        let key = self.queue.pop_front()?;
        self.targets.get(&key).cloned()
    }

    pub fn mark_fetched(&mut self, url: &Url) {
        if let Some(target) = self.targets.get_mut(url.as_str()) {
            target.status = TargetStatus::Fetched;
        }
    }

    pub fn mark_failed(&mut self, url: &Url) {
        if let Some(target) = self.targets.get_mut(url.as_str()) {
            target.status = TargetStatus::Failed;
        }
    }

    pub fn depth_of(&self, url: &Url) -> Option<u32> {
        self.targets.get(url.as_str()).map(|t| t.depth)
    }

    pub fn discovered_count(&self) -> usize {
        self.targets.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.targets
            .values()
            .filter(|t| t.status == TargetStatus::Failed)
            .count()
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-seeds the frontier from the site's sitemap so capture does not
/// depend on every page being link-reachable from the homepage.
pub struct SitemapSeeder {
    http: FetchClient,
}

impl SitemapSeeder {
    /// Candidate locations probed when robots.txt declares no sitemap.
    /// `/wp-sitemap.xml` is the WordPress core default since 5.5.
    const COMMON_PATHS: &'static [&'static str] = &[
        "/sitemap.xml",
        "/wp-sitemap.xml",
        "/sitemap_index.xml",
    ];

    pub fn new(http: FetchClient) -> Self {
        Self { http }
    }

    /// Collect page URLs from the site's sitemaps. Returns an empty
    /// list when no sitemap is fetchable or parseable; discovery then
    /// relies on link-following alone.
    pub async fn seed(&self, seed: &Url) -> Vec<String> {
        let base = format!(
            "{}://{}",
            seed.scheme(),
            seed.host_str().unwrap_or_default()
        );

        let mut roots = self.sitemaps_from_robots(&base).await;
        if roots.is_empty() {
            for path in Self::COMMON_PATHS {
                let candidate = format!("{}{}", base, path);
                if let Some(xml) = self.fetch_sitemap(&candidate).await {
                    tracing::info!("Found sitemap at {}", candidate);
                    roots.push((candidate, Some(xml)));
                    break;
                }
            }
        }

        if roots.is_empty() {
            tracing::info!("No sitemap found for {}", base);
            return Vec::new();
        }

        // Walk sitemap files iteratively; index entries push nested
        // sitemap URLs back onto the queue.
        let mut discovered = Vec::new();
        let mut pending: VecDeque<(String, Option<Vec<u8>>)> = roots.into();
        let mut fetched_sitemaps = 0usize;

        while let Some((sitemap_url, cached)) = pending.pop_front() {
            // A malicious or broken index chain should not loop forever
            if fetched_sitemaps >= 50 {
                tracing::warn!("Sitemap limit reached, stopping at {}", sitemap_url);
                break;
            }
            fetched_sitemaps += 1;

            let xml = match cached {
                Some(xml) => xml,
                None => match self.fetch_sitemap(&sitemap_url).await {
                    Some(xml) => xml,
                    None => {
                        tracing::warn!("Failed to fetch sitemap {}", sitemap_url);
                        continue;
                    }
                },
            };

            for entity in SiteMapReader::new(Cursor::new(xml)) {
                match entity {
                    SiteMapEntity::Url(entry) => {
                        if let Some(url) = entry.loc.get_url() {
                            discovered.push(url.to_string());
                        }
                    }
                    SiteMapEntity::SiteMap(entry) => {
                        if let Some(url) = entry.loc.get_url() {
                            pending.push_back((url.to_string(), None));
                        }
                    }
                    _ => {}
                }
            }
        }

        tracing::info!("Sitemap seeding discovered {} URLs", discovered.len());
        discovered
    }

    /// Sitemap locations declared in robots.txt.
    async fn sitemaps_from_robots(&self, base: &str) -> Vec<(String, Option<Vec<u8>>)> {
        let robots_url = format!("{}/robots.txt", base);
        let robots = match self.http.fetch_text(&robots_url).await {
            Ok(fetched) => fetched.content,
            Err(_) => return Vec::new(),
        };

        robots
            .lines()
            .filter(|line| line.to_lowercase().starts_with("sitemap:"))
            .filter_map(|line| line.split_whitespace().nth(1).map(|s| (s.to_string(), None)))
            .collect()
    }

    async fn fetch_sitemap(&self, sitemap_url: &str) -> Option<Vec<u8>> {
        match self.http.fetch_text(sitemap_url).await {
            Ok(fetched) => Some(fetched.content.into_bytes()),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_add_and_next_is_fifo() {
        let mut frontier = Frontier::new();
        assert!(frontier.add(url("https://example.com/"), 0));
        assert!(frontier.add(url("https://example.com/about"), 1));

        assert_eq!(frontier.next().unwrap().url.as_str(), "https://example.com/");
        assert_eq!(frontier.next().unwrap().url.as_str(), "https://example.com/about");
        assert!(frontier.next().is_none());
    }

    #[test]
    fn test_rediscovery_is_deduplicated() {
        let mut frontier = Frontier::new();
        assert!(frontier.add(url("https://example.com/about"), 1));
        assert!(!frontier.add(url("https://example.com/about"), 3));
        assert_eq!(frontier.discovered_count(), 1);
        assert_eq!(frontier.pending_count(), 1);
    }

    #[test]
    fn test_depth_fixed_at_first_discovery() {
        let mut frontier = Frontier::new();
        frontier.add(url("https://example.com/deep"), 1);
        frontier.add(url("https://example.com/deep"), 5);
        assert_eq!(frontier.depth_of(&url("https://example.com/deep")), Some(1));
    }

    #[test]
    fn test_status_transitions() {
        let mut frontier = Frontier::new();
        let u = url("https://example.com/");
        frontier.add(u.clone(), 0);

        let target = frontier.next().unwrap();
        assert_eq!(target.status, TargetStatus::Pending);

        frontier.mark_fetched(&u);
        assert_eq!(frontier.failed_count(), 0);

        frontier.add(url("https://example.com/broken"), 1);
        frontier.next();
        frontier.mark_failed(&url("https://example.com/broken"));
        assert_eq!(frontier.failed_count(), 1);
    }

    #[test]
    fn test_cycle_does_not_requeue() {
        let mut frontier = Frontier::new();
        frontier.add(url("https://example.com/a"), 1);
        frontier.add(url("https://example.com/b"), 2);
        // b links back to a
        frontier.add(url("https://example.com/a"), 3);

        let mut seen = Vec::new();
        while let Some(t) = frontier.next() {
            seen.push(t.url.as_str().to_string());
        }
        assert_eq!(seen, vec!["https://example.com/a", "https://example.com/b"]);
    }
}
