//! Path allocation: every captured page and asset gets a unique,
//! collision-free location inside the output tree.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use url::Url;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Page,
    Asset,
}

/// One allocation result. `demoted` is set when the natural mirrored
/// path collided with an existing file or directory and the entry was
/// moved into the overflow directory instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub local_path: String,
    pub demoted: bool,
}

/// Assigns local paths deterministically: the same ordered sequence of
/// `allocate` calls always yields the same assignment, including
/// demotions. Re-allocating a known canonical URL returns the cached
/// path.
#[derive(Debug, Default)]
pub struct PathAllocator {
    /// canonical URL -> allocation
    assigned: HashMap<String, Allocation>,
    /// local paths handed out as files
    files: HashSet<String>,
    /// directory prefixes implied by handed-out paths
    dirs: HashSet<String>,
}

impl PathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate (or look up) the local path for a canonical URL.
    /// Called under the run's single allocator lock when downloads are
    /// concurrent, so the file/dir sets never race.
    pub fn allocate(&mut self, kind: PathKind, url: &Url) -> Allocation {
        let key = url.as_str().to_string();
        if let Some(existing) = self.assigned.get(&key) {
            return existing.clone();
        }

        let allocation = match kind {
            PathKind::Page => self.place_page(url),
            PathKind::Asset => self.place_asset(url),
        };

        self.reserve(&allocation.local_path);
        self.assigned.insert(key, allocation.clone());
        allocation
    }

    fn segments(url: &Url) -> Vec<String> {
        url.path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    /// Pages always materialize as `<segments>/index.html`; the seed
    /// page lands at the tree root. A second page whose natural path is
    /// already taken (a query-string variant of the same path) gets an
    /// index file suffixed with a hash of the full URL.
    fn place_page(&self, url: &Url) -> Allocation {
        let segs = Self::segments(url);
        let natural = if segs.is_empty() {
            "index.html".to_string()
        } else {
            format!("{}/index.html", segs.join("/"))
        };

        if !self.conflicts(&natural) {
            return Allocation { local_path: natural, demoted: false };
        }

        let dir = if segs.is_empty() { String::new() } else { format!("{}/", segs.join("/")) };
        Allocation {
            local_path: format!("{}index-{:016x}.html", dir, Self::hash(url.as_str())),
            demoted: true,
        }
    }

    /// Assets mirror their original path segments so relative structure
    /// inside stylesheets keeps working. Collisions with page
    /// directories (an asset URL that is literally a page's directory
    /// name) demote the asset into the overflow directory.
    fn place_asset(&self, url: &Url) -> Allocation {
        let segs = Self::segments(url);
        if !segs.is_empty() {
            let natural = segs.join("/");
            if !self.conflicts(&natural) {
                return Allocation { local_path: natural, demoted: false };
            }
        }

        let filename = segs.last().cloned().unwrap_or_else(|| "asset".to_string());
        let mut local_path = format!(
            "{}/{:016x}-{}",
            Config::ASSET_OVERFLOW_DIR,
            Self::hash(url.as_str()),
            filename
        );
        // The overflow name hashes the full URL, so a conflict here
        // means the same URL was somehow allocated twice; disambiguate
        // by extending the name rather than ever reusing a path.
        while self.conflicts(&local_path) {
            local_path.push('_');
        }
        Allocation { local_path, demoted: true }
    }

    /// A candidate file path conflicts when the exact path is already a
    /// file, the path is already reserved as a directory, or one of its
    /// parent directories is already a file.
    fn conflicts(&self, candidate: &str) -> bool {
        if self.files.contains(candidate) || self.dirs.contains(candidate) {
            return true;
        }
        for prefix in Self::ancestors(candidate) {
            if self.files.contains(&prefix) {
                return true;
            }
        }
        false
    }

    fn reserve(&mut self, local_path: &str) {
        self.files.insert(local_path.to_string());
        for prefix in Self::ancestors(local_path) {
            self.dirs.insert(prefix);
        }
    }

    fn ancestors(path: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (i, c) in path.char_indices() {
            if c == '/' {
                out.push(path[..i].to_string());
            }
        }
        out
    }

    fn hash(input: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        hasher.finish()
    }

    #[cfg(test)]
    fn allocated_count(&self) -> usize {
        self.assigned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_seed_page_at_root() {
        let mut alloc = PathAllocator::new();
        let a = alloc.allocate(PathKind::Page, &url("https://example.com/"));
        assert_eq!(a.local_path, "index.html");
        assert!(!a.demoted);
    }

    #[test]
    fn test_page_under_segments() {
        let mut alloc = PathAllocator::new();
        let a = alloc.allocate(PathKind::Page, &url("https://example.com/about"));
        assert_eq!(a.local_path, "about/index.html");
    }

    #[test]
    fn test_asset_mirrors_original_path() {
        let mut alloc = PathAllocator::new();
        let a = alloc.allocate(
            PathKind::Asset,
            &url("https://example.com/wp-content/uploads/x.jpg"),
        );
        assert_eq!(a.local_path, "wp-content/uploads/x.jpg");
        assert!(!a.demoted);
    }

    #[test]
    fn test_repeat_allocation_is_cached() {
        let mut alloc = PathAllocator::new();
        let u = url("https://example.com/logo.png");
        let a = alloc.allocate(PathKind::Asset, &u);
        let b = alloc.allocate(PathKind::Asset, &u);
        assert_eq!(a, b);
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn test_asset_colliding_with_page_directory_is_demoted() {
        let mut alloc = PathAllocator::new();
        // The page reserves the "about" directory for about/index.html
        alloc.allocate(PathKind::Page, &url("https://example.com/about"));
        // An asset whose path is literally "/about" cannot be a file there
        let a = alloc.allocate(PathKind::Asset, &url("https://example.com/about?download=1"));
        assert!(a.demoted);
        assert!(a.local_path.starts_with(Config::ASSET_OVERFLOW_DIR));
        assert!(a.local_path.ends_with("-about"));
    }

    #[test]
    fn test_asset_under_page_directory_coexists() {
        let mut alloc = PathAllocator::new();
        alloc.allocate(PathKind::Page, &url("https://example.com/about"));
        let a = alloc.allocate(PathKind::Asset, &url("https://example.com/about/team.jpg"));
        assert_eq!(a.local_path, "about/team.jpg");
        assert!(!a.demoted);
    }

    #[test]
    fn test_page_query_variant_gets_hashed_index() {
        let mut alloc = PathAllocator::new();
        let a = alloc.allocate(PathKind::Page, &url("https://example.com/blog"));
        let b = alloc.allocate(PathKind::Page, &url("https://example.com/blog?page=2"));
        assert_eq!(a.local_path, "blog/index.html");
        assert!(b.demoted);
        assert!(b.local_path.starts_with("blog/index-"));
        assert_ne!(a.local_path, b.local_path);
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let inputs = [
            (PathKind::Page, "https://example.com/"),
            (PathKind::Page, "https://example.com/about"),
            (PathKind::Asset, "https://example.com/about?dl=1"),
            (PathKind::Asset, "https://example.com/logo.png"),
        ];

        let run = || {
            let mut alloc = PathAllocator::new();
            inputs
                .iter()
                .map(|(kind, u)| alloc.allocate(*kind, &url(u)).local_path)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_root_asset_url_is_demoted() {
        let mut alloc = PathAllocator::new();
        alloc.allocate(PathKind::Page, &url("https://example.com/"));
        // No path segments to mirror; only the overflow dir can hold it
        let a = alloc.allocate(PathKind::Asset, &url("https://example.com/?favicon"));
        assert!(a.demoted);
        assert!(a.local_path.starts_with(Config::ASSET_OVERFLOW_DIR));
    }
}
