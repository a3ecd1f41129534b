//! URL normalization so equivalent references collapse to one identity.

use url::Url;

/// Query parameters stripped from page URLs before deduplication.
/// Asset URLs keep their full query because versioned variants
/// (`?ver=`, `-300w` responsive files behind a CDN param) select
/// distinct content.
pub const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "ref", "mc_cid", "mc_eid"];

/// Extensions that mark a reference as an asset rather than a page link.
/// Checked against the path component only; query strings are ignored.
pub const ASSET_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".svg", ".ico", ".bmp",
    ".css", ".js", ".mjs", ".json", ".xml",
    ".woff", ".woff2", ".ttf", ".otf", ".eot",
    ".mp4", ".webm", ".mov", ".mp3", ".wav", ".ogg",
    ".pdf", ".zip", ".gz", ".txt", ".map",
];

/// How a raw reference string relates to the capture scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefScope {
    /// Same-site page link, canonical form attached
    Page(Url),
    /// Same-site asset reference, canonical form attached
    Asset(Url),
    /// Different host; passed through unmodified downstream
    External,
    /// mailto:, tel:, javascript:, data:, fragment-only, unparseable
    Skip,
}

pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Check whether a reference host belongs to the mirrored site.
/// `www.` prefixes are treated as the same site, matching how most
/// sites alias the two hosts.
pub fn same_site(host: &str, seed_host: &str) -> bool {
    let strip = |h: &str| h.strip_prefix("www.").map(str::to_string).unwrap_or_else(|| h.to_string());
    strip(host) == strip(seed_host)
}

/// Schemes and pseudo-references that are never fetched or rewritten.
pub fn is_skippable(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("data:")
        || trimmed.starts_with("file:")
        || trimmed.starts_with("about:")
}

/// Does the path component end in a known asset extension?
pub fn is_asset_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Collapse `//` runs inside a path. Hosts occasionally emit
/// `/wp-content//uploads/...` and both spellings resolve to the same
/// resource.
fn collapse_duplicate_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Shared canonicalization: drop the fragment, collapse duplicate
/// slashes. The url crate already lower-cases scheme/host and omits
/// default ports on serialization.
fn canonicalize_common(mut u: Url) -> Url {
    u.set_fragment(None);
    let collapsed = collapse_duplicate_slashes(u.path());
    if collapsed != u.path() {
        u.set_path(&collapsed);
    }
    u
}

/// Resolve a raw reference against its containing page and produce the
/// canonical page identity: tracking params stripped, trailing slash
/// trimmed so `/about` and `/about/` collapse.
pub fn canonical_page_url(base: &Url, raw: &str) -> Option<Url> {
    let mut u = canonicalize_common(join(base, raw)?);

    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| {
            !TRACKING_PARAMS.contains(&k.as_ref()) && !k.starts_with("utm_")
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = u.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        u.set_path(path.trim_end_matches('/'));
    }
    Some(u)
}

/// Canonical asset identity: fragment dropped, query preserved in full.
pub fn canonical_asset_url(base: &Url, raw: &str) -> Option<Url> {
    Some(canonicalize_common(join(base, raw)?))
}

/// Asset identity with the query removed; the manifest records both
/// spellings so either resolves in phase 2.
pub fn asset_url_without_query(asset: &Url) -> Url {
    let mut u = asset.clone();
    u.set_query(None);
    u
}

fn join(base: &Url, raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    // Protocol-relative references inherit the page scheme.
    let joined = if let Some(rest) = trimmed.strip_prefix("//") {
        Url::parse(&format!("{}://{}", base.scheme(), rest)).ok()?
    } else {
        base.join(trimmed).ok()?
    };
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    Some(joined)
}

/// Classify a raw reference found in a rendering: same-site page,
/// same-site asset, external, or not a fetchable reference at all.
pub fn classify(raw: &str, base: &Url, seed_host: &str) -> RefScope {
    if is_skippable(raw) {
        return RefScope::Skip;
    }
    let joined = match join(base, raw) {
        Some(u) => u,
        None => return RefScope::Skip,
    };
    let host = match joined.host_str() {
        Some(h) => h,
        None => return RefScope::Skip,
    };
    if !same_site(host, seed_host) {
        return RefScope::External;
    }
    if is_asset_path(joined.path()) {
        match canonical_asset_url(base, raw) {
            Some(u) => RefScope::Asset(u),
            None => RefScope::Skip,
        }
    } else {
        match canonical_page_url(base, raw) {
            Some(u) => RefScope::Page(u),
            None => RefScope::Skip,
        }
    }
}

/// Add https:// prefix for bare domains (CLI convenience).
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }
    format!("https://{}", trimmed)
}
