// Global configuration constants - single source of truth

pub struct Config;

impl Config {
    // Rendering
    pub const RENDER_TIMEOUT_SECS: u64 = 30;
    pub const POLITENESS_DELAY_MS: u64 = 500;

    // Asset downloads
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 10;
    pub const DOWNLOAD_WORKERS: usize = 4;

    // HTTP/Network config
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const MAX_REDIRECTS: usize = 5;
    pub const POOL_IDLE_PER_HOST: usize = 16;
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;

    // Sitemap seeding
    pub const SITEMAP_TIMEOUT_SECS: u64 = 10;

    // Sanitizer: inline scripts are removed only when the fraction of their
    // tokens matching the vendor dictionary is strictly greater than this.
    // A block at exactly the threshold is kept.
    pub const VENDOR_DENSITY_THRESHOLD: f64 = 0.80;

    // Path allocation
    pub const ASSET_OVERFLOW_DIR: &'static str = "_assets";

    // Events
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

    // Default UA matches a desktop browser; many sites serve stripped-down
    // markup to anything that looks like a bot.
    pub const DEFAULT_USER_AGENT: &'static str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
}
