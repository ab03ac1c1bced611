//! Adapter-archive directory discovery for the `/adapters` endpoint.
//!
//! A plain filesystem-walk pattern: scan a directory, build an
//! in-memory index, no external service dependency. Walks a configured
//! directory of framework listener archives.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Always gzip-compressed tarballs regardless of extension on disk.
pub const ADAPTER_CONTENT_TYPE: &str = "application/gzip";

#[derive(Debug, Clone)]
pub struct AdapterArchive {
    pub name: String,
    pub path: PathBuf,
}

/// Scans `dir` for `*.tar.gz` archives, one level deep, keyed by file
/// stem (`pytest-1.2.3.tar.gz` -> name `pytest-1.2.3`).
pub fn discover(dir: &Path) -> Vec<AdapterArchive> {
    let mut archives = Vec::new();
    if !dir.is_dir() {
        return archives;
    }

    for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if let Some(stem) = file_name.strip_suffix(".tar.gz") {
            archives.push(AdapterArchive {
                name: stem.to_string(),
                path: path.to_path_buf(),
            });
        }
    }

    archives.sort_by(|a, b| a.name.cmp(&b.name));
    archives
}

pub fn find<'a>(archives: &'a [AdapterArchive], name: &str) -> Option<&'a AdapterArchive> {
    archives.iter().find(|a| a.name == name)
}
