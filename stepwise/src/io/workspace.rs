//! Filesystem operations for plan steps, rooted at the workspace directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::retry::truncate_on_char_boundary;
use crate::core::sanitize::sanitize_path;

/// Directories never descended into by listings.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "__pycache__"];

/// What `read` produced for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutput {
    File(String),
    /// Depth-limited listing of a directory.
    Tree(String),
}

impl ReadOutput {
    pub fn into_text(self) -> String {
        match self {
            ReadOutput::File(text) | ReadOutput::Tree(text) => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    RemovedFile,
    RemovedDirectory,
    AlreadyAbsent,
}

/// Step paths are relative to `root`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Turn an absolute path under the root into a relative one. The root
    /// itself becomes `.`.
    ///
    /// Anything else comes back unchanged and is left to contract validation.
    pub fn relativize(&self, path: &str) -> String {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return path.to_string();
        }
        match candidate.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string(),
        }
    }

    /// Sanitize a generator-produced path and make it root-relative.
    pub fn normalize_path(&self, raw: &str) -> String {
        sanitize_path(&self.relativize(&sanitize_path(raw)))
    }

    /// Read a file, or list a directory `tree_depth` levels deep.
    ///
    /// Content beyond `limit` bytes is cut with a notice.
    pub fn read(&self, path: &str, limit: usize, tree_depth: usize) -> Result<ReadOutput> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full).with_context(|| format!("read {path}"))?;
        if meta.is_dir() {
            debug!(path, tree_depth, "reading directory as tree");
            let listing = self.tree_listing(path, tree_depth)?;
            return Ok(ReadOutput::Tree(bounded(listing, limit)));
        }
        let bytes = fs::read(&full).with_context(|| format!("read {path}"))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(ReadOutput::File(bounded(text, limit)))
    }

    fn tree_listing(&self, path: &str, depth: usize) -> Result<String> {
        let dir = self.resolve(path);
        let label = path.trim_end_matches('/');
        let mut out = format!("{}/\n", if label.is_empty() { "." } else { label });

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(depth.max(1))
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir()
                    && (name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())))
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("list {path}"))?;
            let indent = "  ".repeat(entry.depth());
            let name = entry.file_name().to_string_lossy();
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            out.push_str(&format!("{indent}{name}{suffix}\n"));
        }
        Ok(out)
    }

    /// Write `content` verbatim, creating parent directories.
    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(anyhow!("cannot write {path}: it is a directory"));
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("write {path}"))?;
        debug!(path, bytes = content.len(), "wrote file");
        Ok(())
    }

    /// Delete a file or directory. A missing path is not an error.
    pub fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        let full = self.resolve(path);
        let meta = match fs::symlink_metadata(&full) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path, "delete target already absent");
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            Err(err) => return Err(err).with_context(|| format!("stat {path}")),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&full).with_context(|| format!("remove directory {path}"))?;
            Ok(DeleteOutcome::RemovedDirectory)
        } else {
            fs::remove_file(&full).with_context(|| format!("remove {path}"))?;
            Ok(DeleteOutcome::RemovedFile)
        }
    }
}

fn bounded(text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let kept = truncate_on_char_boundary(&text, limit);
    format!("{kept}\n[truncated {} bytes]", text.len() - kept.len())
}
