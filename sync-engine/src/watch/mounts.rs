//! Network filesystem detection.
//!
//! Native notifications are unreliable on network mounts (changes made by
//! other hosts are never reported), so `auto` mode polls there.

use std::path::{Path, PathBuf};

const NETWORK_FS_TYPES: &[&str] = &[
    "nfs", "nfs4", "cifs", "smb3", "smbfs", "9p", "afs", "ceph", "glusterfs", "davfs", "sshfs",
    "fuse.sshfs", "fuse.glusterfs", "fuse.rclone", "fuse.s3fs",
];

/// Filesystem type of the network mount containing `path`, if any.
#[cfg(target_os = "linux")]
pub fn network_fs_type(path: &Path) -> Option<String> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    network_fs_in_table(&mounts, &path)
}

/// Filesystem type of the network mount containing `path`, if any.
#[cfg(not(target_os = "linux"))]
pub fn network_fs_type(_path: &Path) -> Option<String> {
    None
}

/// Find the mount containing `path` in a `/proc/mounts` style table and
/// return its type if it is a network filesystem.
pub(crate) fn network_fs_in_table(table: &str, path: &Path) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mount_point), Some(fs_type)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let mount_point = PathBuf::from(unescape_mount(mount_point));
        if !path.starts_with(&mount_point) {
            continue;
        }
        let depth = mount_point.components().count();
        if best.map_or(true, |(d, _)| depth >= d) {
            best = Some((depth, fs_type));
        }
    }
    let (_, fs_type) = best?;
    NETWORK_FS_TYPES
        .contains(&fs_type)
        .then(|| fs_type.to_string())
}

/// Decode the octal escapes (`\040` for space) used in mount tables.
fn unescape_mount(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(b) = u8::try_from(value) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0
server:/export /mnt/media nfs4 rw,relatime 0 0
//nas/share /mnt/nas\\040box cifs rw 0 0
/dev/sdb1 /mnt/media/local ext4 rw 0 0
";

    #[test]
    fn local_paths_are_not_network() {
        assert_eq!(network_fs_in_table(TABLE, Path::new("/home/user")), None);
    }

    #[test]
    fn nfs_mount_is_detected() {
        assert_eq!(
            network_fs_in_table(TABLE, Path::new("/mnt/media/movies")),
            Some("nfs4".to_string())
        );
    }

    #[test]
    fn deepest_mount_wins() {
        assert_eq!(network_fs_in_table(TABLE, Path::new("/mnt/media/local/x")), None);
    }

    #[test]
    fn escaped_mount_points_match() {
        assert_eq!(
            network_fs_in_table(TABLE, Path::new("/mnt/nas box/tv")),
            Some("cifs".to_string())
        );
    }

    #[test]
    fn prefix_is_component_wise() {
        assert_eq!(network_fs_in_table(TABLE, Path::new("/mnt/mediafiles")), None);
    }
}
