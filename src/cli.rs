use clap::{Parser, Subcommand};

/// CLI entry point for capturing static mirrors of websites.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O or config error, 4=network error
#[derive(Parser, Debug)]
#[command(name = "sitemirror")]
#[command(about = "Capture a self-contained offline mirror of a website")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture a site: crawl, download assets, then rewrite and sanitize.
    Mirror {
        #[arg(help = "Seed URL to capture (scheme optional, https assumed)")]
        url: String,

        #[arg(
            short,
            long,
            default_value = "./mirrors",
            help = "Root directory for captured runs"
        )]
        output: String,

        #[arg(long, help = "Stop after this many pages")]
        max_pages: Option<usize>,

        #[arg(
            long,
            default_value_t = 30,
            help = "Per-page render timeout in seconds"
        )]
        render_timeout: u64,

        #[arg(
            long,
            default_value_t = 500,
            help = "Delay between page fetches in milliseconds"
        )]
        delay: u64,

        #[arg(
            short,
            long,
            default_value_t = 4,
            help = "Concurrent asset downloads per page"
        )]
        workers: usize,

        #[arg(long, help = "Override the User-Agent header")]
        user_agent: Option<String>,
    },

    /// Re-run rewriting and sanitization over an existing run directory.
    Rewrite {
        #[arg(help = "Run directory containing manifest.json")]
        run_dir: String,
    },
}

impl Cli {
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
