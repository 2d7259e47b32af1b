//! The pihash command: hash one image, or list the images similar to it.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::cache::CachedHashes;
use crate::cli::{Cli, OutputFormat};
use crate::config::HashConfig;
use crate::context::HashContext;
use crate::error::{ExitCode, HashError};
use crate::hashing::{hamming_distance, HashKind, Precision};
use crate::logging::init_logging;

/// Hashes of one file as printed.
#[derive(Debug, Serialize)]
struct HashReport {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ahash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dhash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phash: Option<u64>,
}

impl HashReport {
    fn new(path: &Path, hashes: &CachedHashes, kinds: &[HashKind]) -> Self {
        let pick = |kind| {
            if kinds.contains(&kind) {
                hashes.get(kind)
            } else {
                None
            }
        };
        Self {
            file: path.display().to_string(),
            ahash: pick(HashKind::Ahash),
            dhash: pick(HashKind::Dhash),
            phash: pick(HashKind::Phash),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimilarImage {
    file: String,
    /// Hamming distance per selected algorithm
    distances: Vec<(HashKind, u32)>,
}

#[derive(Debug, Serialize)]
struct FailedImage {
    file: String,
    code: i32,
    error: String,
}

#[derive(Debug, Serialize)]
struct ComparisonReport {
    base: HashReport,
    similar: Vec<SimilarImage>,
    failed: Vec<FailedImage>,
}

/// Run the command and print results to stdout.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_output(&cli, &mut out)
}

/// Run the command, writing results to `out`.
pub fn run_with_output<W: Write>(cli: &Cli, out: &mut W) -> Result<ExitCode> {
    let config = build_config(cli)?;

    if cli.print_config {
        write!(out, "{}", toml::to_string_pretty(&config)?)?;
        return Ok(ExitCode::Success);
    }

    let path = cli
        .path
        .as_deref()
        .context("an image path is required")?;

    let ctx = HashContext::create(config).context("Failed to open the hash cache")?;
    if cli.clear_cache {
        let removed = ctx.clear_cache().context("Failed to clear the hash cache")?;
        log::info!("Removed {} cached entries", removed);
    }

    let kinds = cli.kinds();
    let code = if cli.comparisons.is_empty() {
        print_hashes(&ctx, path, &kinds, cli.format, out)?
    } else {
        compare(&ctx, path, &cli.comparisons, &kinds, cli.threshold, cli.format, out)?
    };

    let stats = ctx.stats();
    log::debug!(
        "Cache: {} hits, {} misses, {} decodes",
        stats.hits,
        stats.misses,
        stats.decodes
    );
    if let Err(e) = ctx.close() {
        log::warn!("Failed to close the hash cache: {}", e);
    }
    Ok(code)
}

/// Layered configuration plus command-line overrides.
fn build_config(cli: &Cli) -> Result<HashConfig> {
    let mut config = HashConfig::load(cli.config.as_deref())?;

    if let Some(dir) = &cli.cache {
        config.cache_dir = dir.clone();
    } else if cli.user_cache {
        config.cache_dir = HashConfig::user_cache_dir()
            .context("Failed to determine the user cache directory")?;
    }
    if let Some(strategy) = cli.key_strategy {
        config.key_strategy = strategy.into();
    }
    if let Some(precision) = cli.precision {
        config.precision = precision.into();
    }
    Ok(config)
}

fn print_hashes<W: Write>(
    ctx: &HashContext,
    path: &Path,
    kinds: &[HashKind],
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitCode> {
    let hashes = ctx
        .hash_kinds(path, kinds)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    let report = HashReport::new(path, &hashes, kinds);

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Text => {
            writeln!(out, "file: {}", report.file)?;
            for kind in kinds {
                if let Some(value) = hashes.get(*kind) {
                    writeln!(out, "{}: {}", kind.as_str(), value)?;
                }
            }
        }
    }
    Ok(ExitCode::Success)
}

fn compare<W: Write>(
    ctx: &HashContext,
    base_path: &Path,
    comparisons: &[std::path::PathBuf],
    kinds: &[HashKind],
    threshold: Option<u32>,
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitCode> {
    let base = ctx
        .hash_kinds(base_path, kinds)
        .with_context(|| format!("Failed to hash {}", base_path.display()))?;

    let results: Vec<(&Path, Result<CachedHashes, HashError>)> = comparisons
        .par_iter()
        .map(|path| (path.as_path(), ctx.hash_kinds(path, kinds)))
        .collect();

    let precision = ctx.config().precision;
    let mut similar = Vec::new();
    let mut failed = Vec::new();
    for (path, result) in results {
        match result {
            Ok(hashes) => {
                if let Some(distances) =
                    distances_within(&base, &hashes, kinds, threshold, precision)
                {
                    similar.push(SimilarImage {
                        file: path.display().to_string(),
                        distances,
                    });
                }
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                failed.push(FailedImage {
                    file: path.display().to_string(),
                    code: e.code(),
                    error: e.to_string(),
                });
            }
        }
    }

    let code = if !failed.is_empty() {
        ExitCode::PartialSuccess
    } else if similar.is_empty() {
        ExitCode::NoMatches
    } else {
        ExitCode::Success
    };

    let report = ComparisonReport {
        base: HashReport::new(base_path, &base, kinds),
        similar,
        failed,
    };

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Text => {
            writeln!(out, "Base Image:")?;
            writeln!(out, "{}", report.base.file)?;
            writeln!(out, "Similar Images:")?;
            for image in &report.similar {
                writeln!(out, "{}", image.file)?;
            }
        }
    }
    Ok(code)
}

/// Per-kind distances if every kind is within its threshold.
fn distances_within(
    base: &CachedHashes,
    other: &CachedHashes,
    kinds: &[HashKind],
    threshold: Option<u32>,
    precision: Precision,
) -> Option<Vec<(HashKind, u32)>> {
    kinds
        .iter()
        .map(|&kind| {
            let distance = hamming_distance(base.get(kind)?, other.get(kind)?);
            let limit = threshold.unwrap_or_else(|| kind.threshold_at(precision));
            (distance <= limit).then_some((kind, distance))
        })
        .collect()
}
