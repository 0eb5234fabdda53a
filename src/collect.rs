// src/collect.rs

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Walk the tree rooted at `root` and return every directory reachable from
/// it, parents before children, siblings in name order.
///
/// Each directory is appended when it is visited as the current root, and
/// again when its parent lists it as a child, so everything below `root`
/// appears twice. Downstream file globbing is idempotent to the duplicates.
///
/// Traversal counts visited directories and stops once the count exceeds
/// `max_dirs`, leaving the rest of the tree unvisited. That cap is the only
/// abnormal condition; unreadable directories are skipped, so this never
/// fails.
pub fn collect_dirs(root: &Path, max_dirs: usize) -> Vec<PathBuf> {
    let mut all_dirs = Vec::new();
    let mut visited = 0usize;
    walk(root, max_dirs, &mut visited, &mut all_dirs);
    all_dirs
}

/// Returns false once the cap is hit so callers unwind without visiting more.
fn walk(dir: &Path, max_dirs: usize, visited: &mut usize, out: &mut Vec<PathBuf>) -> bool {
    // A directory we cannot list is never yielded at all.
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return true,
    };

    *visited += 1;
    if *visited > max_dirs {
        warn!(
            max_dirs,
            "exceeded maximum number of directories traversed, consider a lower starting point"
        );
        return false;
    }

    out.push(dir.to_path_buf());

    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    subdirs.sort();

    // Child references first, then each child gets its own visit.
    out.extend(subdirs.iter().cloned());

    for sub in &subdirs {
        if !walk(sub, max_dirs, visited, out) {
            return false;
        }
    }
    true
}
