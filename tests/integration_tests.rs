//! End-to-end capture tests over a stubbed renderer. No network: the
//! stub serves a small in-memory site, and the seed host uses the
//! reserved `.invalid` TLD so sitemap probing fails fast.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use sitemirror::pipeline::MANIFEST_FILENAME;
use sitemirror::{
    assets, render, EntryKind, FetchError, Manifest, Mirror, MirrorConfig, MirrorError,
    ProgressEvent, Renderer, Rendering,
};

const SEED: &str = "https://test.invalid/";

/// Serves pages from a fixed map; unknown URLs return 404.
struct StubRenderer {
    pages: HashMap<String, String>,
}

impl StubRenderer {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&self, url: &str, _timeout: Duration) -> Result<Rendering, FetchError> {
        match self.pages.get(url) {
            Some(html) => Ok(Rendering {
                html: html.clone(),
                links: render::extract_links(html),
                asset_refs: assets::extract_asset_refs(html),
            }),
            None => Err(FetchError::HttpStatus(404)),
        }
    }
}

fn test_config(output: &TempDir) -> MirrorConfig {
    let mut config = MirrorConfig::new(SEED, output.path());
    config.politeness_delay_ms = 0;
    config
}

fn consent_script() -> String {
    // Pure vendor vocabulary, far above the removal threshold
    let words = ["consent", "cookie", "gdpr", "cmp", "vendors", "banner"];
    let mut body = String::new();
    for _ in 0..20 {
        for w in words {
            body.push_str(w);
            body.push(' ');
        }
    }
    format!("<script>{}</script>", body)
}

fn stub_site() -> StubRenderer {
    let index = format!(
        r#"<html><head>{}</head><body>
            <a href="/about">About</a>
            <a href="/contact">Contact</a>
            <a href="https://other.invalid/elsewhere">External</a>
        </body></html>"#,
        consent_script()
    );
    let about = r#"<html><body>
            <a href="/">Home</a>
            <a href="/contact">Contact</a>
            <div id="CybotCookiebotDialog">banner</div>
        </body></html>"#;
    let contact = r#"<html><body>
            <a href="/about">About</a>
            <form action="https://test.invalid/submit" method="post">
                <input type="submit" value="Send">
            </form>
        </body></html>"#;

    StubRenderer::new(&[
        ("https://test.invalid/", index.as_str()),
        ("https://test.invalid/about", about),
        ("https://test.invalid/contact", contact),
    ])
}

#[tokio::test]
async fn test_full_run_captures_site() {
    let output = TempDir::new().unwrap();
    let mirror = Mirror::new(test_config(&output), Arc::new(stub_site()));

    let outcome = mirror.run().await.unwrap();
    assert_eq!(outcome.stats.pages_captured, 3);
    assert_eq!(outcome.stats.pages_failed, 0);

    assert!(outcome.run_dir.join("index.html").exists());
    assert!(outcome.run_dir.join("about/index.html").exists());
    assert!(outcome.run_dir.join("contact/index.html").exists());
    assert!(outcome.run_dir.join(MANIFEST_FILENAME).exists());
    assert!(outcome.run_dir.join("sanitization_report.json").exists());
    assert!(outcome.run_dir.join("run_stats.json").exists());
}

#[tokio::test]
async fn test_manifest_records_pages_with_depth() {
    let output = TempDir::new().unwrap();
    let mirror = Mirror::new(test_config(&output), Arc::new(stub_site()));

    let outcome = mirror.run().await.unwrap();
    let (manifest, seed) = Manifest::load(outcome.run_dir.join(MANIFEST_FILENAME)).unwrap();
    assert_eq!(seed, SEED);

    let root = manifest.get(SEED).unwrap();
    assert_eq!(root.kind, EntryKind::Page);
    assert_eq!(root.depth, Some(0));
    assert_eq!(root.local, "index.html");

    let about = manifest.get("https://test.invalid/about").unwrap();
    assert_eq!(about.depth, Some(1));
    assert_eq!(about.local, "about/index.html");

    // /contact is linked from both the root and /about; one entry,
    // shortest distance wins.
    assert_eq!(manifest.pages().count(), 3);
    let contact = manifest.get("https://test.invalid/contact").unwrap();
    assert_eq!(contact.depth, Some(1));
}

#[tokio::test]
async fn test_links_rewritten_depth_aware() {
    let output = TempDir::new().unwrap();
    let mirror = Mirror::new(test_config(&output), Arc::new(stub_site()));
    let outcome = mirror.run().await.unwrap();

    let index = std::fs::read_to_string(outcome.run_dir.join("index.html")).unwrap();
    assert!(index.contains(r#"href="./about/index.html""#), "got: {}", index);
    assert!(index.contains(r#"href="./contact/index.html""#));
    // External link untouched
    assert!(index.contains(r#"href="https://other.invalid/elsewhere""#));

    let about = std::fs::read_to_string(outcome.run_dir.join("about/index.html")).unwrap();
    assert!(about.contains(r#"href="../index.html""#), "got: {}", about);
    assert!(about.contains(r#"href="../contact/index.html""#));
}

#[tokio::test]
async fn test_consent_artifacts_removed() {
    let output = TempDir::new().unwrap();
    let mirror = Mirror::new(test_config(&output), Arc::new(stub_site()));
    let outcome = mirror.run().await.unwrap();
    assert!(outcome.stats.elements_removed > 0);

    let index = std::fs::read_to_string(outcome.run_dir.join("index.html")).unwrap();
    assert!(!index.contains("gdpr"), "consent script survived: {}", index);

    let about = std::fs::read_to_string(outcome.run_dir.join("about/index.html")).unwrap();
    assert!(!about.contains("CybotCookiebotDialog"));

    let contact = std::fs::read_to_string(outcome.run_dir.join("contact/index.html")).unwrap();
    assert!(!contact.contains("https://test.invalid/submit"));
    assert!(!contact.contains(r#"type="submit""#));
}

#[tokio::test]
async fn test_broken_link_fails_only_that_page() {
    let output = TempDir::new().unwrap();
    let renderer = StubRenderer::new(&[(
        "https://test.invalid/",
        r#"<html><body><a href="/gone">Gone</a></body></html>"#,
    )]);
    let mirror = Mirror::new(test_config(&output), Arc::new(renderer));

    let outcome = mirror.run().await.unwrap();
    assert_eq!(outcome.stats.pages_captured, 1);
    assert_eq!(outcome.stats.pages_failed, 1);
    assert!(!outcome.run_dir.join("gone/index.html").exists());
}

#[tokio::test]
async fn test_unrenderable_seed_is_an_error() {
    let output = TempDir::new().unwrap();
    let renderer = StubRenderer::new(&[]);
    let mirror = Mirror::new(test_config(&output), Arc::new(renderer));

    let result = mirror.run().await;
    assert!(matches!(result, Err(MirrorError::NothingCaptured)));
}

#[tokio::test]
async fn test_max_pages_limits_capture() {
    let output = TempDir::new().unwrap();
    let mut config = test_config(&output);
    config.max_pages = Some(1);
    let mirror = Mirror::new(config, Arc::new(stub_site()));

    let outcome = mirror.run().await.unwrap();
    assert_eq!(outcome.stats.pages_captured, 1);
    assert!(outcome.run_dir.join("index.html").exists());
    assert!(!outcome.run_dir.join("about/index.html").exists());
}

#[tokio::test]
async fn test_rewrite_existing_is_idempotent() {
    let output = TempDir::new().unwrap();
    let mirror = Mirror::new(test_config(&output), Arc::new(stub_site()));
    let outcome = mirror.run().await.unwrap();

    let before = std::fs::read_to_string(outcome.run_dir.join("about/index.html")).unwrap();
    mirror.rewrite_existing(&outcome.run_dir).await.unwrap();
    let after = std::fs::read_to_string(outcome.run_dir.join("about/index.html")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_shortcut_link_to_deep_page_climbs_full_directory_depth() {
    // The homepage links straight to a page two path segments deep;
    // its file sits at blog/post/index.html even though its link
    // distance from the seed is 1, and the prefix must climb from the
    // file's directory, not the link distance.
    let output = TempDir::new().unwrap();
    let renderer = StubRenderer::new(&[
        (
            "https://test.invalid/",
            r#"<html><body><a href="/blog/post">Post</a></body></html>"#,
        ),
        (
            "https://test.invalid/blog/post",
            r#"<html><body><a href="/">Home</a></body></html>"#,
        ),
    ]);
    let mirror = Mirror::new(test_config(&output), Arc::new(renderer));
    let outcome = mirror.run().await.unwrap();

    let post = std::fs::read_to_string(outcome.run_dir.join("blog/post/index.html")).unwrap();
    assert!(post.contains(r#"href="../../index.html""#), "got: {}", post);
    // The climbed path lands on a real file
    let home = outcome.run_dir.join("blog/post").join("../../index.html");
    assert!(std::fs::metadata(&home).is_ok(), "dangling: {}", home.display());

    // Link distance is still what the manifest records
    let (manifest, _) = Manifest::load(outcome.run_dir.join(MANIFEST_FILENAME)).unwrap();
    let post_entry = manifest.get("https://test.invalid/blog/post").unwrap();
    assert_eq!(post_entry.depth, Some(1));
}

#[tokio::test]
async fn test_anchor_linked_document_is_downloaded() {
    let output = TempDir::new().unwrap();
    let renderer = StubRenderer::new(&[(
        "https://test.invalid/",
        r#"<html><body><a href="/files/brochure.pdf">Brochure</a></body></html>"#,
    )]);
    let mirror = Mirror::new(test_config(&output), Arc::new(renderer));

    let outcome = mirror.run().await.unwrap();
    // The host is unreachable, so the download cannot succeed, but it
    // must be attempted and counted rather than silently skipped.
    assert_eq!(
        outcome.stats.assets_downloaded + outcome.stats.assets_failed,
        1
    );
    // A document link is never treated as a page to crawl
    assert_eq!(outcome.stats.pages_captured, 1);
}

#[tokio::test]
async fn test_fatal_error_emits_terminal_event() {
    let output = TempDir::new().unwrap();
    let blocker = output.path().join("not-a-dir");
    std::fs::write(&blocker, b"plain file").unwrap();

    // Output root is a file, so creating the run directory fails
    let mut config = MirrorConfig::new(SEED, &blocker);
    config.politeness_delay_ms = 0;
    let mirror = Mirror::new(config, Arc::new(stub_site()));
    let mut rx = mirror.events().subscribe();

    let result = mirror.run().await;
    assert!(matches!(result, Err(MirrorError::Io(_))));

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ProgressEvent::RunFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure, "no terminal event reached subscribers");
}

#[tokio::test]
async fn test_unknown_link_points_back_at_origin() {
    let output = TempDir::new().unwrap();
    let renderer = StubRenderer::new(&[
        (
            "https://test.invalid/",
            r#"<html><body><a href="/about">About</a></body></html>"#,
        ),
        (
            "https://test.invalid/about",
            // /archive is discovered after /about renders but the run
            // is capped before it is captured
            r#"<html><body><a href="/archive">Archive</a></body></html>"#,
        ),
    ]);
    let mut config = test_config(&output);
    config.max_pages = Some(2);
    let mirror = Mirror::new(config, Arc::new(renderer));

    let outcome = mirror.run().await.unwrap();
    let about = std::fs::read_to_string(outcome.run_dir.join("about/index.html")).unwrap();
    // In scope but never captured: degrade to the live origin URL
    assert!(
        about.contains(r#"href="https://test.invalid/archive""#),
        "got: {}",
        about
    );
}
