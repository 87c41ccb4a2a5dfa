//! Pattern-based search and replace across a file or a directory tree.
//!
//! Directory walks are partial-failure tolerant: a file that cannot be read
//! or rewritten is reported and skipped, and the walk continues. Single-file
//! calls surface their errors.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::fsio;

/// Largest file the replacer will rewrite (5 MiB).
pub const MAX_REPLACE_BYTES: u64 = 5 * 1024 * 1024;

/// Aggregated result of a search-and-replace call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceReport {
    pub target: PathBuf,
    pub files_scanned: usize,
    pub files_modified: usize,
    pub files_skipped: usize,
    pub errors: usize,
    pub total_replacements: usize,
    /// One human-readable line per notable file.
    pub lines: Vec<String>,
    /// Paths rewritten by this call; the engine invalidates these.
    #[serde(skip)]
    pub modified_paths: Vec<PathBuf>,
}

impl ReplaceReport {
    fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            files_scanned: 0,
            files_modified: 0,
            files_skipped: 0,
            errors: 0,
            total_replacements: 0,
            lines: Vec::new(),
            modified_paths: Vec::new(),
        }
    }
}

enum FileOutcome {
    Modified(usize),
    NoMatches,
    SkippedLarge,
    SkippedBinary,
}

/// Compiles the search pattern, honoring the case-sensitivity toggle.
pub fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|error| EngineError::InvalidPattern(error.to_string()))
}

/// Runs the substitution over `target`.
///
/// A file target is processed directly and errors are fatal to the call; a
/// directory target is walked depth-first with per-file errors swallowed
/// into the report.
pub fn run(target: &Path, re: &Regex, replacement: &str) -> Result<ReplaceReport> {
    let metadata = std::fs::metadata(target)?;
    let mut report = ReplaceReport::new(target);

    if metadata.is_dir() {
        run_directory(target, re, replacement, &mut report);
    } else {
        let outcome = replace_in_file(target, re, replacement)?;
        record(&mut report, target, outcome);
    }

    Ok(report)
}

fn run_directory(root: &Path, re: &Regex, replacement: &str, report: &mut ReplaceReport) {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                log::debug!("replace walk error under {}: {error}", root.display());
                report.errors += 1;
                continue;
            }
        };
        if !entry.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        match replace_in_file(path, re, replacement) {
            Ok(outcome) => record(report, path, outcome),
            Err(error) => {
                log::debug!("replace failed for {}: {error}", path.display());
                report.errors += 1;
                report
                    .lines
                    .push(format!("Failed {}: {error}", path.display()));
            }
        }
    }
}

fn replace_in_file(path: &Path, re: &Regex, replacement: &str) -> Result<FileOutcome> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_REPLACE_BYTES {
        return Ok(FileOutcome::SkippedLarge);
    }

    let bytes = std::fs::read(path)?;
    if fsio::looks_binary(&bytes) {
        return Ok(FileOutcome::SkippedBinary);
    }

    let text = String::from_utf8_lossy(&bytes);
    let count = re.find_iter(&text).count();
    if count == 0 {
        return Ok(FileOutcome::NoMatches);
    }

    let replaced = re.replace_all(&text, replacement);
    fsio::atomic_write(path, replaced.as_bytes())?;
    Ok(FileOutcome::Modified(count))
}

fn record(report: &mut ReplaceReport, path: &Path, outcome: FileOutcome) {
    report.files_scanned += 1;
    match outcome {
        FileOutcome::Modified(count) => {
            report.files_modified += 1;
            report.total_replacements += count;
            report.modified_paths.push(path.to_path_buf());
            report
                .lines
                .push(format!("Modified {}: {count} replacement(s)", path.display()));
        }
        FileOutcome::NoMatches => {}
        FileOutcome::SkippedLarge => {
            report.files_skipped += 1;
            report
                .lines
                .push(format!("Skipped {}: exceeds size limit", path.display()));
        }
        FileOutcome::SkippedBinary => {
            report.files_skipped += 1;
            report
                .lines
                .push(format!("Skipped {}: binary file", path.display()));
        }
    }
}
