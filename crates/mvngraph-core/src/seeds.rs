//! Seed input: seed lists and local repository scans.
//!
//! A seed list is newline-delimited. Each line is a manifest URL under one of
//! the configured mirrors, a manifest path inside the local repository, or a
//! `group:artifact:version` triple. Blank lines and `#` comments are ignored.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::coordinate::Coordinate;
use crate::fetcher::Mirror;

/// Seed file looked up at the local repository root when no seed is given
pub const DEFAULT_SEED_FILE: &str = "poms.txt";

/// A seed line that could not be mapped to a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedError {
    #[error("line {line}: URL '{url}' is not a manifest under a known mirror")]
    UnknownMirror { line: usize, url: String },

    #[error("line {line}: path '{path}' is not a manifest inside the local repository")]
    OutsideRepository { line: usize, path: String },

    #[error("line {line}: unrecognized seed '{text}'")]
    Unrecognized { line: usize, text: String },
}

/// Parsed seed list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedList {
    /// Coordinates in input order, without duplicates
    pub coordinates: Vec<Coordinate>,
    pub rejected: Vec<SeedError>,
}

impl SeedList {
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    fn push(&mut self, coordinate: Coordinate) {
        if !self.coordinates.contains(&coordinate) {
            self.coordinates.push(coordinate);
        }
    }
}

/// Parse a seed list.
pub fn parse_seed_list(text: &str, mirrors: &[Mirror], local_root: &Path, extension: &str) -> SeedList {
    let mut seeds = SeedList::default();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let entry = raw.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }

        match parse_seed(entry, line, mirrors, local_root, extension) {
            Ok(coordinate) => {
                debug!(line, coordinate = %coordinate, "Seed");
                seeds.push(coordinate);
            }
            Err(e) => {
                warn!(error = %e, "Rejected seed");
                seeds.rejected.push(e);
            }
        }
    }

    seeds
}

/// Read and parse a seed file.
pub fn read_seed_file(
    path: &Path,
    mirrors: &[Mirror],
    local_root: &Path,
    extension: &str,
) -> std::io::Result<SeedList> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_seed_list(&text, mirrors, local_root, extension))
}

fn parse_seed(
    entry: &str,
    line: usize,
    mirrors: &[Mirror],
    local_root: &Path,
    extension: &str,
) -> Result<Coordinate, SeedError> {
    if entry.contains("://") {
        return mirrors
            .iter()
            .find_map(|mirror| {
                let base = mirror.url.trim_end_matches('/');
                let rest = entry.strip_prefix(base)?.strip_prefix('/')?;
                Coordinate::from_url_path(rest, extension)
            })
            .ok_or_else(|| SeedError::UnknownMirror {
                line,
                url: entry.to_string(),
            });
    }

    let looks_like_path = entry.contains('/') || entry.contains('\\') || entry.ends_with(&format!(".{}", extension));
    if !looks_like_path {
        return entry.parse::<Coordinate>().map_err(|_| SeedError::Unrecognized {
            line,
            text: entry.to_string(),
        });
    }

    let path = Path::new(entry);
    let relative = if let Ok(rest) = path.strip_prefix(local_root) {
        Some(rest)
    } else if path.is_absolute() {
        None
    } else {
        Some(path)
    };

    relative
        .and_then(|rel| Coordinate::from_relative_path(rel, extension))
        .ok_or_else(|| SeedError::OutsideRepository {
            line,
            path: entry.to_string(),
        })
}

/// Every manifest in the local repository whose location matches the layout.
///
/// Hidden directories and in-progress download files are skipped. Paths are
/// returned sorted.
pub fn scan_local_repository(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        // the root itself may be a hidden temp directory
        e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
    }) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error walking local repository: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let matches_layout = path
            .strip_prefix(root)
            .ok()
            .and_then(|rel| Coordinate::from_relative_path(rel, extension))
            .is_some();
        if matches_layout {
            found.push(path.to_path_buf());
        } else {
            debug!(path = %path.display(), "Ignoring file outside the repository layout");
        }
    }

    found.sort();
    found
}
