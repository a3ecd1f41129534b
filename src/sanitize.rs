//! Consent-banner sanitization.
//!
//! Two independent removal rules over the parsed document: an
//! unconditional rule keyed on known vendor script hosts, element ids,
//! class names, and data attributes, and a conservative inline-script
//! rule that removes a block only when its vendor-token density is
//! overwhelming. Navigation or menu scripts that merely mention
//! "cookie" a few times must survive.

use lol_html::{element, text, HtmlRewriter, Settings};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("HTML rewriting error: {0}")]
    Rewriting(String),

    #[error("Sanitized document is not valid UTF-8")]
    Encoding,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Script hosts that only ever serve consent-management code.
pub const VENDOR_SCRIPT_HOSTS: &[&str] = &[
    "cookiebot.com",
    "consent.cookiebot.com",
    "consentcdn.cookiebot.com",
    "cdn.cookielaw.org",
    "cookielaw.org",
    "onetrust.com",
    "cdn.onetrust.com",
    "usercentrics.eu",
    "app.usercentrics.eu",
    "borlabs.io",
    "consentmanager.net",
    "cmp.quantcast.com",
    "privacy-mgmt.com",
    "iubenda.com",
    "cdn.iubenda.com",
    "termly.io",
    "osano.com",
    "trustarc.com",
    "consent.trustarc.com",
    "cookieyes.com",
    "cdn-cookieyes.com",
    "sdk.privacy-center.org",
];

/// Element ids planted by consent vendors. Matched exactly or as a
/// prefix; Cookiebot in particular generates `CybotCookiebotDialog*`
/// variants.
pub const VENDOR_IDS: &[&str] = &[
    "CybotCookiebotDialog",
    "onetrust-consent-sdk",
    "onetrust-banner-sdk",
    "ot-sdk-btn",
    "usercentrics-root",
    "usercentrics-cmp",
    "BorlabsCookieBox",
    "BorlabsCookieWidget",
    "cmplz-cookiebanner",
    "cookie-law-info-bar",
    "cookie-notice",
    "cookieConsent",
    "truste-consent-track",
    "iubenda-cs-banner",
];

/// Class names planted by consent vendors.
pub const VENDOR_CLASSES: &[&str] = &[
    "cc-window",
    "cc-banner",
    "cmplz-cookiebanner",
    "cookie-law-info-bar",
    "cookie-notice-container",
    "BorlabsCookie",
    "ot-sdk-container",
    "qc-cmp2-container",
    "iubenda-cs-container",
    "termly-banner",
    "osano-cm-window",
];

/// Data attributes planted by consent vendors.
pub const VENDOR_DATA_ATTRS: &[&str] = &[
    "data-cookieconsent",
    "data-cookie-consent",
    "data-borlabs-cookie-unblock",
    "data-usercentrics",
    "data-cmp-vendor",
    "data-iub-purposes",
];

/// Dictionary for the inline-script density score. Deliberately
/// includes generic words ("banner", "privacy") because density, not
/// presence, is what triggers removal.
pub const VENDOR_KEYWORDS: &[&str] = &[
    "consent",
    "cookie",
    "cookies",
    "cmp",
    "gdpr",
    "ccpa",
    "tcf",
    "iab",
    "optout",
    "optin",
    "vendor",
    "vendors",
    "purposes",
    "banner",
    "privacy",
    "necessary",
    "preferences",
    "statistics",
    "marketing",
    "revoke",
    "withdraw",
    "cookiebot",
    "cybot",
    "onetrust",
    "optanon",
    "usercentrics",
    "borlabs",
    "quantcast",
    "didomi",
    "iubenda",
    "termly",
    "osano",
    "trustarc",
    "cookieyes",
];

/// Fraction of a script's tokens that match the vendor dictionary.
/// Tokens are maximal alphanumeric runs, compared case-insensitively.
/// An empty script scores 0.0.
pub fn vendor_token_density(script: &str) -> f64 {
    let keywords: HashSet<&str> = VENDOR_KEYWORDS.iter().copied().collect();

    let mut total = 0usize;
    let mut matched = 0usize;
    for token in script
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        total += 1;
        if keywords.contains(token.to_ascii_lowercase().as_str()) {
            matched += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

fn host_matches_vendor(src: &str) -> bool {
    let host = match crate::url_norm::extract_host(src.trim()) {
        Some(h) => h,
        // Protocol-relative vendor includes still carry the host
        None => match crate::url_norm::extract_host(&format!("https:{}", src.trim())) {
            Some(h) => h,
            None => return false,
        },
    };
    VENDOR_SCRIPT_HOSTS
        .iter()
        .any(|vendor| host == *vendor || host.ends_with(&format!(".{}", vendor)))
}

fn id_matches_vendor(id: &str) -> bool {
    VENDOR_IDS.iter().any(|v| id == *v || id.starts_with(v))
}

fn class_matches_vendor(class_attr: &str) -> bool {
    class_attr
        .split_whitespace()
        .any(|token| VENDOR_CLASSES.contains(&token))
}

/// Counters for one sanitized page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SanitizeStats {
    pub removed_elements: usize,
    pub removed_scripts: usize,
}

impl SanitizeStats {
    pub fn total(&self) -> usize {
        self.removed_elements + self.removed_scripts
    }
}

/// Per-page sanitization outcome, collected into the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSanitization {
    pub url: String,
    pub removed_elements: usize,
    pub removed_scripts: usize,
}

/// Diagnostics-only report persisted next to the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizationReport {
    pub pages: Vec<PageSanitization>,
}

impl SanitizationReport {
    pub fn record(&mut self, url: &str, stats: SanitizeStats) {
        self.pages.push(PageSanitization {
            url: url.to_string(),
            removed_elements: stats.removed_elements,
            removed_scripts: stats.removed_scripts,
        });
    }

    pub fn total_removed(&self) -> usize {
        self.pages
            .iter()
            .map(|p| p.removed_elements + p.removed_scripts)
            .sum()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SanitizeError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Sanitize one page. Scripts and elements that do not match are
    /// passed through byte-for-byte. Also neutralizes forms so the
    /// static copy cannot post to the dead origin.
    pub fn sanitize(&self, html: &str) -> Result<(String, SanitizeStats), SanitizeError> {
        let doomed_scripts = self.classify_inline_scripts(html)?;

        let removed_elements = Cell::new(0usize);
        let removed_scripts = Cell::new(0usize);
        let script_ordinal = Cell::new(0usize);

        let mut output = Vec::with_capacity(html.len());
        {
            let mut rewriter = HtmlRewriter::new(
                Settings {
                    element_content_handlers: vec![
                        element!("script", |el| {
                            let ordinal = script_ordinal.get();
                            script_ordinal.set(ordinal + 1);

                            if let Some(src) = el.get_attribute("src") {
                                if host_matches_vendor(&src) {
                                    el.remove();
                                    removed_scripts.set(removed_scripts.get() + 1);
                                }
                            } else if doomed_scripts.contains(&ordinal) {
                                el.remove();
                                removed_scripts.set(removed_scripts.get() + 1);
                            }
                            Ok(())
                        }),
                        element!("*", |el| {
                            if el.tag_name() == "script" {
                                return Ok(());
                            }
                            let id_hit = el
                                .get_attribute("id")
                                .map(|id| id_matches_vendor(&id))
                                .unwrap_or(false);
                            let class_hit = el
                                .get_attribute("class")
                                .map(|c| class_matches_vendor(&c))
                                .unwrap_or(false);
                            let data_hit = VENDOR_DATA_ATTRS
                                .iter()
                                .any(|attr| el.has_attribute(attr));

                            if id_hit || class_hit || data_hit {
                                el.remove();
                                removed_elements.set(removed_elements.get() + 1);
                            }
                            Ok(())
                        }),
                        element!("form", |el| {
                            el.set_attribute("action", "")?;
                            el.set_attribute("method", "get")?;
                            Ok(())
                        }),
                        element!("input[type]", |el| {
                            if el
                                .get_attribute("type")
                                .map(|t| t.eq_ignore_ascii_case("submit"))
                                .unwrap_or(false)
                            {
                                el.set_attribute("type", "button")?;
                            }
                            Ok(())
                        }),
                    ],
                    ..Settings::default()
                },
                |chunk: &[u8]| output.extend_from_slice(chunk),
            );

            rewriter
                .write(html.as_bytes())
                .map_err(|e| SanitizeError::Rewriting(e.to_string()))?;
            rewriter
                .end()
                .map_err(|e| SanitizeError::Rewriting(e.to_string()))?;
        }

        let stats = SanitizeStats {
            removed_elements: removed_elements.get(),
            removed_scripts: removed_scripts.get(),
        };

        let sanitized = String::from_utf8(output).map_err(|_| SanitizeError::Encoding)?;
        Ok((sanitized, stats))
    }

    /// First pass: stream the document once, numbering every `<script>`
    /// and collecting inline bodies, then mark the ordinals whose
    /// vendor-token density exceeds the threshold. The removal pass
    /// must decide at the element's start tag, before its text is
    /// available, so the decision is made here. Both passes run the
    /// same streaming parser, so ordinals line up even for scripts
    /// inside `<template>` elements or misnested tables.
    fn classify_inline_scripts(&self, html: &str) -> Result<HashSet<usize>, SanitizeError> {
        // (is_inline, body) per script, in document order
        let scripts: RefCell<Vec<(bool, String)>> = RefCell::new(Vec::new());

        let mut scanner = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!("script", |el| {
                        scripts
                            .borrow_mut()
                            .push((el.get_attribute("src").is_none(), String::new()));
                        Ok(())
                    }),
                    text!("script", |chunk| {
                        if let Some((_, body)) = scripts.borrow_mut().last_mut() {
                            body.push_str(chunk.as_str());
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |_: &[u8]| (),
        );
        scanner
            .write(html.as_bytes())
            .map_err(|e| SanitizeError::Rewriting(e.to_string()))?;
        scanner
            .end()
            .map_err(|e| SanitizeError::Rewriting(e.to_string()))?;

        Ok(scripts
            .into_inner()
            .into_iter()
            .enumerate()
            .filter(|(_, (is_inline, body))| {
                *is_inline && vendor_token_density(body) > Config::VENDOR_DENSITY_THRESHOLD
            })
            .map(|(ordinal, _)| ordinal)
            .collect())
    }
}
