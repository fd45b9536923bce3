use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of decoded slices kept in the slice cache.
pub const DEFAULT_CACHE_SIZE: usize = 1_000_000;

/// Default per-fetch byte limit (50 MiB).
pub const DEFAULT_FETCH_SIZE_LIMIT: u64 = 50 * 1024 * 1024;

/// Default number of slices loaded concurrently by a single query.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Options consumed by [`IndexedCramReader`](crate::reader::IndexedCramReader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Maximum number of decoded slices held by the cache (0 disables caching).
    /// This is an element count, not a byte budget.
    pub cache_size: usize,
    /// Maximum number of bytes a single archive read may request.
    pub fetch_size_limit: u64,
    /// Verify CRC32 and reference MD5 checksums instead of trusting them.
    pub verify_checksums: bool,
    /// Number of slices a query may load concurrently.
    pub concurrency: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            fetch_size_limit: DEFAULT_FETCH_SIZE_LIMIT,
            verify_checksums: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "cramr")]
#[command(about = "Fetch alignment records overlapping an interval from an indexed CRAM file")]
pub struct Config {
    /// Reference FASTA path (a `.fai` index must sit next to it)
    #[arg(short = 'r', long = "ref", env = "CRAMR_REF")]
    pub reference: PathBuf,

    /// CRAM file path or http(s) URL
    #[arg(short, long, env = "CRAMR_CRAM")]
    pub cram: String,

    /// CRAI index path or URL (defaults to `<cram>.crai`)
    #[arg(long, env = "CRAMR_CRAI")]
    pub crai: Option<String>,

    /// Numeric reference sequence id
    #[arg(long)]
    pub id: i32,

    /// Interval start (1-based)
    #[arg(short, long)]
    pub start: i64,

    /// Interval end
    #[arg(short, long)]
    pub end: i64,

    /// Maximum number of decoded slices kept in memory
    #[arg(long, env = "CRAMR_CACHE_SIZE", default_value = "1000000")]
    pub cache_size: usize,

    /// Maximum bytes per archive read
    #[arg(long, env = "CRAMR_FETCH_SIZE_LIMIT", default_value = "52428800")]
    pub fetch_size_limit: u64,

    /// Verify block CRC32 and slice reference MD5 checksums
    #[arg(long, env = "CRAMR_VERIFY_CHECKSUMS", default_value = "false")]
    pub verify_checksums: bool,

    /// Slices loaded concurrently per query
    #[arg(long, env = "CRAMR_CONCURRENCY", default_value = "4")]
    pub concurrency: usize,

    /// Print each record as a JSON line
    #[arg(long, default_value = "false")]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn effective_crai(&self) -> String {
        self.crai
            .clone()
            .unwrap_or_else(|| format!("{}.crai", self.cram))
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            cache_size: self.cache_size,
            fetch_size_limit: self.fetch_size_limit,
            verify_checksums: self.verify_checksums,
            concurrency: self.concurrency.max(1),
        }
    }
}
