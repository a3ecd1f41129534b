//! Phase-2 HTML rewriting.
//!
//! Reopens every captured page and replaces domain references with
//! manifest-resolved, depth-correct relative paths. Runs as a
//! streaming rewrite so bytes outside the touched attributes pass
//! through unmodified, and it is idempotent: references that already
//! point at local paths (`./`, `../`) are never eligible again.

use lol_html::{element, HtmlRewriter, Settings};
use thiserror::Error;
use url::Url;

use crate::assets::{self, SrcsetEntry, CSS_URL_RE, LAZY_DATA_ATTRS};
use crate::manifest::Manifest;
use crate::url_norm;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("HTML rewriting error: {0}")]
    Rewriting(String),

    #[error("Rewritten document is not valid UTF-8")]
    Encoding,
}

/// `../` repeated `depth` times; the root page gets `./` so its links
/// stay explicitly relative.
pub fn relative_prefix(depth: u32) -> String {
    if depth == 0 {
        "./".to_string()
    } else {
        "../".repeat(depth as usize)
    }
}

/// Rewrites one page's references against the finished manifest.
pub struct PageRewriter<'a> {
    manifest: &'a Manifest,
    seed_host: &'a str,
}

impl<'a> PageRewriter<'a> {
    pub fn new(manifest: &'a Manifest, seed_host: &'a str) -> Self {
        Self { manifest, seed_host }
    }

    /// Rewrite every reference-bearing attribute of `html`, resolving
    /// through the manifest with a prefix that climbs `depth` levels,
    /// where `depth` is the directory depth of the page's own file in
    /// the output tree. References to the seed domain without a manifest entry
    /// are rewritten to absolute origin URLs so the page degrades
    /// gracefully online; external references are never modified.
    pub fn rewrite(&self, html: &str, page_url: &Url, depth: u32) -> Result<String, RewriteError> {
        let prefix_owned = relative_prefix(depth);
        let prefix = prefix_owned.as_str();
        let mut output = Vec::with_capacity(html.len());

        let mut handlers = vec![
            element!("[src]", |el| {
                // Lazy-loaded media: when the hydration target was
                // captured, it replaces the placeholder src outright.
                for attr in LAZY_DATA_ATTRS {
                    if attr.ends_with("srcset") {
                        continue;
                    }
                    if let Some(value) = el.get_attribute(attr) {
                        if let Some(local) = self.resolve_captured(&value, page_url, prefix) {
                            el.set_attribute("src", &local)?;
                            return Ok(());
                        }
                    }
                }
                if let Some(value) = el.get_attribute("src") {
                    if let Some(new_value) = self.resolve(&value, page_url, prefix) {
                        el.set_attribute("src", &new_value)?;
                    }
                }
                Ok(())
            }),
            element!("[href]", |el| {
                if let Some(value) = el.get_attribute("href") {
                    if let Some(new_value) = self.resolve(&value, page_url, prefix) {
                        el.set_attribute("href", &new_value)?;
                    }
                }
                Ok(())
            }),
            element!("[srcset]", |el| {
                if let Some(value) = el.get_attribute("srcset") {
                    if let Some(new_value) = self.resolve_srcset(&value, page_url, prefix) {
                        el.set_attribute("srcset", &new_value)?;
                    }
                }
                Ok(())
            }),
            element!("[poster]", |el| {
                if let Some(value) = el.get_attribute("poster") {
                    if let Some(new_value) = self.resolve(&value, page_url, prefix) {
                        el.set_attribute("poster", &new_value)?;
                    }
                }
                Ok(())
            }),
            element!("[style]", |el| {
                if let Some(value) = el.get_attribute("style") {
                    if let Some(new_value) = self.resolve_css(&value, page_url, prefix) {
                        el.set_attribute("style", &new_value)?;
                    }
                }
                Ok(())
            }),
        ];

        for attr in LAZY_DATA_ATTRS {
            handlers.push(element!(format!("[{}]", attr), move |el| {
                if let Some(value) = el.get_attribute(attr) {
                    let rewritten = if attr.ends_with("srcset") {
                        self.resolve_srcset(&value, page_url, prefix)
                    } else {
                        self.resolve(&value, page_url, prefix)
                    };
                    if let Some(new_value) = rewritten {
                        el.set_attribute(attr, &new_value)?;
                    }
                }
                Ok(())
            }));
        }

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );

        rewriter
            .write(html.as_bytes())
            .map_err(|e| RewriteError::Rewriting(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Rewriting(e.to_string()))?;

        String::from_utf8(output).map_err(|_| RewriteError::Encoding)
    }

    /// Resolve one raw reference. Returns `None` when the reference
    /// must stay untouched (external, pseudo-scheme, already local, or
    /// an absolute in-domain URL with no manifest entry).
    fn resolve(&self, raw: &str, page_url: &Url, prefix: &str) -> Option<String> {
        let trimmed = raw.trim();
        if url_norm::is_skippable(trimmed) {
            return None;
        }
        // Already-localized references keep rewriting idempotent.
        if trimmed.starts_with("./") || trimmed.starts_with("../") {
            return None;
        }

        let absolute = if trimmed.starts_with("//") {
            Url::parse(&format!("{}:{}", page_url.scheme(), trimmed)).ok()?
        } else {
            page_url.join(trimmed).ok()?
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            return None;
        }
        let host = absolute.host_str()?;
        if !url_norm::same_site(host, self.seed_host) {
            return None;
        }

        // Assets first (query preserved), then the page identity.
        if let Some(asset) = url_norm::canonical_asset_url(page_url, trimmed) {
            if let Some(local) = self.manifest.lookup(asset.as_str()) {
                return Some(format!("{}{}", prefix, local));
            }
        }
        if let Some(page) = url_norm::canonical_page_url(page_url, trimmed) {
            if let Some(local) = self.manifest.lookup(page.as_str()) {
                return Some(format!("{}{}", prefix, local));
            }
        }

        // In scope but never captured (failed download, out-of-scope
        // page): point back at the live origin.
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            None
        } else {
            Some(absolute.to_string())
        }
    }

    /// Resolve strictly through the manifest: `Some` only when the
    /// reference was captured, with no live-origin fallback.
    fn resolve_captured(&self, raw: &str, page_url: &Url, prefix: &str) -> Option<String> {
        let trimmed = raw.trim();
        if url_norm::is_skippable(trimmed)
            || trimmed.starts_with("./")
            || trimmed.starts_with("../")
        {
            return None;
        }
        let asset = url_norm::canonical_asset_url(page_url, trimmed)?;
        self.manifest
            .lookup(asset.as_str())
            .map(|local| format!("{}{}", prefix, local))
    }

    /// Rewrite a `srcset` value entry by entry, keeping each
    /// width/density descriptor attached to its (possibly replaced)
    /// URL.
    fn resolve_srcset(&self, srcset: &str, page_url: &Url, prefix: &str) -> Option<String> {
        let mut changed = false;
        let entries: Vec<SrcsetEntry> = assets::split_srcset(srcset)
            .into_iter()
            .map(|mut entry| {
                if let Some(new_url) = self.resolve(&entry.url, page_url, prefix) {
                    entry.url = new_url;
                    changed = true;
                }
                entry
            })
            .collect();

        if changed {
            Some(assets::join_srcset(&entries))
        } else {
            None
        }
    }

    fn resolve_css(&self, css: &str, page_url: &Url, prefix: &str) -> Option<String> {
        let mut changed = false;
        let rewritten = CSS_URL_RE.replace_all(css, |caps: &regex::Captures<'_>| {
            match self.resolve(&caps[1], page_url, prefix) {
                Some(new_url) => {
                    changed = true;
                    format!("url({})", new_url)
                }
                None => caps[0].to_string(),
            }
        });

        if changed {
            Some(rewritten.into_owned())
        } else {
            None
        }
    }
}
