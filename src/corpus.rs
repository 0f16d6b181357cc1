//! Corpus extraction: walk a working tree, index every file, and
//! concatenate the textual ones into a single delimited blob.
//!
//! Each textual file becomes one segment:
//!
//! ```text
//! ----- File: src/main.rs -----
//! <file content>
//! -------------------------
//! ```
//!
//! The walk is sorted by file name so two extractions of the same tree
//! produce identical indexes and byte-identical corpora. Version-control
//! metadata directories are pruned. Per-file failures never abort the
//! walk: the file stays in the index and its content is skipped.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::ops::Range;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::classify::classify;
use crate::config::ExtractConfig;
use crate::models::ExtractedRepo;
use crate::workspace::WorkingTree;

pub const SEGMENT_HEADER_PREFIX: &str = "----- File: ";
pub const SEGMENT_HEADER_SUFFIX: &str = " -----";
pub const SEGMENT_FOOTER: &str = "-------------------------";

const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Position of one file's content inside [`Corpus::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusSegment {
    pub path: String,
    /// Byte range of the file content, excluding header and footer.
    pub content: Range<usize>,
}

/// Concatenated text of all eligible files, with the structural
/// boundaries the extractor wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    text: String,
    segments: Vec<CorpusSegment>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one file segment.
    pub fn push_file(&mut self, path: &str, content: &str) {
        self.text.push_str(SEGMENT_HEADER_PREFIX);
        self.text.push_str(path);
        self.text.push_str(SEGMENT_HEADER_SUFFIX);
        self.text.push('\n');
        let start = self.text.len();
        self.text.push_str(content);
        let end = self.text.len();
        self.text.push('\n');
        self.text.push_str(SEGMENT_FOOTER);
        self.text.push('\n');

        self.segments.push(CorpusSegment {
            path: path.to_string(),
            content: start..end,
        });
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn segments(&self) -> &[CorpusSegment] {
        &self.segments
    }

    /// Content written for `path`, exactly as read from disk.
    pub fn segment_content(&self, path: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.path == path)
            .map(|s| &self.text[s.content.clone()])
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Walk filters derived from [`ExtractConfig`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    exclude: GlobSet,
    max_file_bytes: Option<u64>,
}

impl ExtractOptions {
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        Ok(Self {
            exclude: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
        })
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            exclude: GlobSet::empty(),
            max_file_bytes: None,
        }
    }
}

/// Extract the file index and corpus from a fetched tree.
pub fn extract(tree: &WorkingTree, options: &ExtractOptions) -> ExtractedRepo {
    extract_dir(tree.path(), options)
}

/// Extract from any directory. Infallible by construction: unreadable
/// entries are logged and skipped.
pub fn extract_dir(root: &Path, options: &ExtractOptions) -> ExtractedRepo {
    let mut index = Vec::new();
    let mut corpus = Corpus::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_vcs_dir(e) && !is_excluded_dir(root, e, &options.exclude));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let path = entry.path();
        let Some(rel_str) = relative_path(root, path) else {
            continue;
        };
        if options.exclude.is_match(&rel_str) {
            continue;
        }

        index.push(rel_str.clone());

        // Symlinks are listed but never followed: their target may live
        // outside the clone.
        if !file_type.is_file() {
            continue;
        }

        if let Some(limit) = options.max_file_bytes {
            match entry.metadata() {
                Ok(meta) if meta.len() > limit => {
                    debug!(
                        "Skipping content of large file {} ({} bytes > {})",
                        rel_str,
                        meta.len(),
                        limit
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Skipping content of {}: {}", rel_str, e);
                    continue;
                }
            }
        }

        if !classify(path).is_corpus_eligible() {
            continue;
        }

        // Read fully before touching the corpus so a failure leaves no
        // dangling header.
        match std::fs::read(path) {
            Ok(bytes) => corpus.push_file(&rel_str, &String::from_utf8_lossy(&bytes)),
            Err(e) => debug!("Skipping content of {}: {}", rel_str, e),
        }
    }

    let char_count = corpus.char_count();
    ExtractedRepo {
        index,
        corpus,
        char_count,
    }
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| VCS_DIRS.contains(&name))
            .unwrap_or(false)
}

/// A directory matching an exclude glob by its own path (`node_modules`,
/// `vendor/*`) is pruned along with everything below it.
fn is_excluded_dir(root: &Path, entry: &DirEntry, exclude: &GlobSet) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && relative_path(root, entry.path())
            .map(|rel| exclude.is_match(&rel))
            .unwrap_or(false)
}

/// `/`-separated path of `path` under `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
