//! Finder: locating input files and their determiners from paths alone
//!
//! A [`Finder`] walks a directory hierarchy laid out according to a
//! [`NamingGrammar`] and never opens the files it reports.
//!
//! # Listing cache
//!
//! Each directory is listed at most once per `Finder`. Files added or
//! removed after the first listing are not seen by later calls on the same
//! instance. A single ingestion run creates one finder and tolerates this;
//! build a new finder to pick up changes.

pub mod grammar;

pub use grammar::{DeterminerSpec, NamingGrammar};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{DeterminerValue, Determiners};

/// Errors from locating input files
#[derive(Debug, Error)]
pub enum FinderError {
    /// The file name does not follow the naming grammar
    #[error("Unrecognized path: {}", .0.display())]
    UnrecognizedPath(PathBuf),

    #[error("Invalid naming grammar: {0}")]
    Grammar(String),

    #[error("Key ({key}) is not a leading part of ({expected})")]
    BadKey { key: String, expected: String },

    #[error("Failed to list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for finder operations
pub type FinderResult<T> = Result<T, FinderError>;

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    len: u64,
}

/// Resolves a file hierarchy into determiner tuples.
#[derive(Debug)]
pub struct Finder {
    root: PathBuf,
    grammar: NamingGrammar,
    listings: Mutex<HashMap<PathBuf, Arc<Vec<Entry>>>>,
}

impl Finder {
    pub fn new(root: impl Into<PathBuf>, grammar: NamingGrammar) -> Self {
        Self {
            root: root.into(),
            grammar,
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Finder for the forced-source layout.
    pub fn forced_source(root: impl Into<PathBuf>) -> Self {
        Self::new(root, NamingGrammar::forced_source())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn grammar(&self) -> &NamingGrammar {
        &self.grammar
    }

    /// Sorted listing of `dir`, cached after the first call.
    fn list(&self, dir: &Path) -> FinderResult<Arc<Vec<Entry>>> {
        if let Some(cached) = self
            .listings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(dir)
        {
            return Ok(Arc::clone(cached));
        }

        let io_err = |source| FinderError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = Vec::new();
        for item in std::fs::read_dir(dir).map_err(io_err)? {
            let item = item.map_err(io_err)?;
            let Ok(name) = item.file_name().into_string() else {
                continue;
            };
            // Follows symlinks so linked data directories are walked
            let metadata = match std::fs::metadata(item.path()) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", item.path().display(), e);
                    continue;
                }
            };
            entries.push(Entry {
                name,
                path: item.path(),
                is_dir: metadata.is_dir(),
                len: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} entries in {}", entries.len(), dir.display());

        let entries = Arc::new(entries);
        self.listings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(dir.to_path_buf(), Arc::clone(&entries));
        Ok(entries)
    }

    /// Subdirectories of `dir` at `depth` that follow the grammar and agree
    /// with `partial`.
    fn matching_dirs(
        &self,
        dir: &Path,
        depth: usize,
        partial: &Determiners,
    ) -> FinderResult<Vec<PathBuf>> {
        Ok(self
            .list(dir)?
            .iter()
            .filter(|e| e.is_dir && self.grammar.dir_matches(depth, &e.name, partial))
            .map(|e| e.path.clone())
            .collect())
    }

    /// Determiners of a file, from its base name.
    pub fn determiners_of(&self, path: &Path) -> FinderResult<Determiners> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.grammar.parse_file_name(n))
            .ok_or_else(|| FinderError::UnrecognizedPath(path.to_path_buf()))
    }

    /// First file anywhere in the hierarchy that follows the grammar, in
    /// sorted depth-first order. Used to discover the table schema.
    pub fn some_file(&self) -> FinderResult<Option<(PathBuf, Determiners)>> {
        self.first_file(&self.root, 0)
    }

    fn first_file(&self, dir: &Path, depth: usize) -> FinderResult<Option<(PathBuf, Determiners)>> {
        let any = Determiners::new();
        if depth > self.grammar.depth() {
            for entry in self.list(dir)?.iter().filter(|e| !e.is_dir) {
                if let Some(determiners) = self.grammar.parse_file_name(&entry.name) {
                    return Ok(Some((entry.path.clone(), determiners)));
                }
            }
            return Ok(None);
        }
        for sub in self.matching_dirs(dir, depth, &any)? {
            if let Some(found) = self.first_file(&sub, depth + 1)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Every file whose determiners start with `partial`, in sorted order.
    ///
    /// With `exclude_empty`, files no larger than the grammar's minimum size
    /// are left out; they carry a header but no rows.
    pub fn files_for_unit(
        &self,
        partial: &Determiners,
        exclude_empty: bool,
    ) -> FinderResult<Vec<PathBuf>> {
        self.grammar.check_partial(partial)?;

        let mut dirs = vec![self.root.clone()];
        for depth in 0..=self.grammar.depth() {
            let mut next = Vec::new();
            for dir in &dirs {
                next.extend(self.matching_dirs(dir, depth, partial)?);
            }
            dirs = next;
        }

        let mut files = Vec::new();
        for dir in &dirs {
            for entry in self.list(dir)?.iter().filter(|e| !e.is_dir) {
                let Some(determiners) = self.grammar.parse_file_name(&entry.name) else {
                    continue;
                };
                if !partial.is_prefix_of(&determiners) {
                    continue;
                }
                if exclude_empty && entry.len <= self.grammar.min_file_size() {
                    debug!("Skipping empty file {}", entry.path.display());
                    continue;
                }
                files.push(entry.path.clone());
            }
        }
        Ok(files)
    }

    /// Every value of the first determiner present under the root, sorted
    /// and without duplicates.
    pub fn units(&self) -> FinderResult<Vec<DeterminerValue>> {
        let mut units: Vec<DeterminerValue> = self
            .list(&self.root)?
            .iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| self.grammar.unit_of_dir(&e.name))
            .collect();
        units.sort_by(|a, b| match (a, b) {
            (DeterminerValue::Int(a), DeterminerValue::Int(b)) => a.cmp(b),
            _ => a.to_string().cmp(&b.to_string()),
        });
        units.dedup();
        Ok(units)
    }

    /// The directory or file a partial key names: the unit directory for one
    /// determiner, a level directory for more, the file itself for a full
    /// key. `None` if nothing on disk matches.
    pub fn path_for(&self, partial: &Determiners) -> FinderResult<Option<PathBuf>> {
        self.grammar.check_partial(partial)?;
        if partial.is_empty() {
            return Ok(Some(self.root.clone()));
        }

        if partial.len() == self.grammar.determiners().len() {
            return Ok(self.files_for_unit(partial, false)?.into_iter().next());
        }

        let mut current = vec![self.root.clone()];
        let levels = partial.len().min(self.grammar.depth() + 1);
        for depth in 0..levels {
            let mut next = Vec::new();
            for dir in &current {
                next.extend(self.matching_dirs(dir, depth, partial)?);
            }
            current = next;
        }
        Ok(current.into_iter().next())
    }
}
