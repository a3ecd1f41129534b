pub mod assets;
pub mod cli;
pub mod config;
pub mod discover;
pub mod events;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod render;
pub mod rewrite;
pub mod sanitize;
pub mod url_norm;

// Re-export main types for library usage
pub use discover::{CrawlTarget, Frontier, SitemapSeeder, TargetStatus};
pub use events::{EventBus, ProgressEvent, RunStats};
pub use manifest::{EntryKind, Manifest, ManifestEntry, ManifestError};
pub use paths::{Allocation, PathAllocator, PathKind};
pub use pipeline::{Ledger, Mirror, MirrorConfig, MirrorError, MirrorOutcome};
pub use render::{FetchClient, FetchError, HttpRenderer, Renderer, Rendering};
pub use rewrite::PageRewriter;
pub use sanitize::{SanitizationReport, Sanitizer};
