//! Extension policy: copy or symlink.
//!
//! The policy is a pure function of the file name's extension against the
//! task's allow-set. Size and content never influence it.

use sync_types::{ActionPolicy, ChangeKind, ExtensionSet, Policy, RelPath, SyncAction};

/// Decide how `path` is materialized.
pub fn policy_for(path: &RelPath, extensions: &ExtensionSet) -> Policy {
    match path.extension() {
        Some(ext) if extensions.contains(ext) => Policy::Copy,
        _ => Policy::Symlink,
    }
}

/// Derive the action for a normalized change.
pub fn action_for(path: RelPath, kind: ChangeKind, extensions: &ExtensionSet) -> SyncAction {
    let policy = match kind.normalized() {
        ChangeKind::Deleted => ActionPolicy::Delete,
        _ => policy_for(&path, extensions).into(),
    };
    SyncAction {
        relative_path: path,
        policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn rel(s: &str) -> RelPath {
        RelPath::from_path(Path::new(s)).unwrap()
    }

    fn allow() -> ExtensionSet {
        ExtensionSet::parse_list("jpg,png").unwrap()
    }

    #[test]
    fn allowed_extension_is_copied() {
        assert_eq!(policy_for(&rel("a.jpg"), &allow()), Policy::Copy);
        assert_eq!(policy_for(&rel("deep/dir/b.png"), &allow()), Policy::Copy);
    }

    #[test]
    fn everything_else_is_linked() {
        assert_eq!(policy_for(&rel("a.nfo"), &allow()), Policy::Symlink);
        assert_eq!(policy_for(&rel("README"), &allow()), Policy::Symlink);
        assert_eq!(policy_for(&rel(".jpg"), &allow()), Policy::Symlink);
        assert_eq!(policy_for(&rel("jpg.dir/file"), &allow()), Policy::Symlink);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(policy_for(&rel("A.JPG"), &allow()), Policy::Symlink);
    }

    #[test]
    fn empty_allow_set_links_everything() {
        assert_eq!(policy_for(&rel("a.jpg"), &ExtensionSet::default()), Policy::Symlink);
    }

    #[test]
    fn actions_follow_kind() {
        let a = action_for(rel("a.jpg"), ChangeKind::Deleted, &allow());
        assert_eq!(a.policy, ActionPolicy::Delete);
        let b = action_for(rel("a.jpg"), ChangeKind::Modified, &allow());
        assert_eq!(b.policy, ActionPolicy::Copy);
        let c = action_for(rel("a.nfo"), ChangeKind::RenamedTo, &allow());
        assert_eq!(c.policy, ActionPolicy::Symlink);
        let d = action_for(rel("a.nfo"), ChangeKind::RenamedFrom, &allow());
        assert_eq!(d.policy, ActionPolicy::Delete);
    }
}
