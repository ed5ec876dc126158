//! Snapshot diffing for the polling change source.

use std::collections::HashMap;
use std::path::PathBuf;
use sync_types::{ChangeKind, FileStamp, RawChange};

/// Stat snapshot of a tree: absolute file path to stamp.
pub type Snapshot = HashMap<PathBuf, FileStamp>;

/// Synthesize changes between two snapshots.
///
/// Deletions come first, then creations, then modifications; each group is
/// sorted by path so the output is deterministic.
pub fn diff_snapshots(prev: &Snapshot, next: &Snapshot) -> Vec<RawChange> {
    let mut deleted: Vec<&PathBuf> = prev.keys().filter(|p| !next.contains_key(*p)).collect();
    let mut created = Vec::new();
    let mut modified = Vec::new();
    for (path, stamp) in next {
        match prev.get(path) {
            None => created.push(path),
            Some(old) if old != stamp => modified.push(path),
            Some(_) => {}
        }
    }
    deleted.sort();
    created.sort();
    modified.sort();

    let mut out = Vec::with_capacity(deleted.len() + created.len() + modified.len());
    for (paths, kind) in [
        (deleted, ChangeKind::Deleted),
        (created, ChangeKind::Created),
        (modified, ChangeKind::Modified),
    ] {
        out.extend(paths.into_iter().map(|p| RawChange::path(p.clone(), kind)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, i64, u64)]) -> Snapshot {
        entries
            .iter()
            .map(|(p, m, s)| (PathBuf::from(p), FileStamp::new(*m, *s)))
            .collect()
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let s = snap(&[("/in/a", 1, 1), ("/in/b", 2, 2)]);
        assert!(diff_snapshots(&s, &s).is_empty());
    }

    #[test]
    fn detects_all_kinds() {
        let prev = snap(&[("/in/gone", 1, 1), ("/in/same", 1, 1), ("/in/touched", 1, 1)]);
        let next = snap(&[("/in/new", 1, 1), ("/in/same", 1, 1), ("/in/touched", 2, 1)]);
        assert_eq!(
            diff_snapshots(&prev, &next),
            vec![
                RawChange::path("/in/gone", ChangeKind::Deleted),
                RawChange::path("/in/new", ChangeKind::Created),
                RawChange::path("/in/touched", ChangeKind::Modified),
            ]
        );
    }

    #[test]
    fn size_only_change_is_modified() {
        let prev = snap(&[("/in/a", 5, 1)]);
        let next = snap(&[("/in/a", 5, 2)]);
        assert_eq!(
            diff_snapshots(&prev, &next),
            vec![RawChange::path("/in/a", ChangeKind::Modified)]
        );
    }

    #[test]
    fn first_scan_creates_everything() {
        let next = snap(&[("/in/b", 1, 1), ("/in/a", 1, 1)]);
        let out = diff_snapshots(&Snapshot::new(), &next);
        assert_eq!(
            out,
            vec![
                RawChange::path("/in/a", ChangeKind::Created),
                RawChange::path("/in/b", ChangeKind::Created),
            ]
        );
    }
}
