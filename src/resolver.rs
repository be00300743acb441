use crate::storage::{StorageDirectory, StorageEntry};

/// Flags for [`resolve`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Normalize the path with a trailing slash.
    pub is_dir: bool,
    /// Leave out the `container:` prefix.
    pub omit_name: bool,
    /// Return only the `container:` prefix.
    pub only_name: bool,
}

impl ResolveOptions {
    pub fn file() -> Self {
        Self::default()
    }

    pub fn dir() -> Self {
        Self {
            is_dir: true,
            ..Self::default()
        }
    }

    /// Container address (`fs`) for calls taking container and child separately.
    pub fn container() -> Self {
        Self {
            only_name: true,
            ..Self::default()
        }
    }

    /// Child address (`remote`) relative to [`ResolveOptions::container`].
    pub fn remote(is_dir: bool) -> Self {
        Self {
            is_dir,
            omit_name: true,
            only_name: false,
        }
    }
}

/// Address of `path` inside `entry`; backend-M storages always go through `bridge`.
pub fn resolve_entry(entry: &StorageEntry, bridge: &str, path: &str, opts: ResolveOptions) -> String {
    let path = if path == "/" { "" } else { path };
    entry.backend.address(&entry.name, bridge, path, opts)
}

/// Maps a logical `(storage, path)` pair to a backend address.
///
/// `None` means the storage is unknown; callers must not issue a backend call.
pub fn resolve(
    directory: &StorageDirectory,
    storage_name: &str,
    path: &str,
    opts: ResolveOptions,
) -> Option<String> {
    let entry = directory.search(storage_name)?;
    Some(resolve_entry(&entry, directory.bridge(), path, opts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Backend, SpaceInfo};

    const BRIDGE: &str = ".netmount-openlist.";

    fn directory() -> StorageDirectory {
        let directory = StorageDirectory::new(BRIDGE);
        directory.replace(vec![
            StorageEntry {
                name: "S3".to_string(),
                backend: Backend::Rclone,
                driver: "s3".to_string(),
                space: SpaceInfo::UNKNOWN,
                hidden: false,
            },
            StorageEntry {
                name: "Alist".to_string(),
                backend: Backend::Openlist {
                    id: 1,
                    mount_path: "/gdrive".to_string(),
                },
                driver: "GoogleDrive".to_string(),
                space: SpaceInfo::UNKNOWN,
                hidden: false,
            },
        ]);
        directory
    }

    #[test]
    fn resolves_both_backends() {
        let directory = directory();
        assert_eq!(
            resolve(&directory, "Alist", "/a/b.txt", ResolveOptions::file()).unwrap(),
            format!("{BRIDGE}:Alist/a/b.txt")
        );
        assert_eq!(
            resolve(&directory, "S3", "/a/b.txt", ResolveOptions::file()).unwrap(),
            "S3:a/b.txt"
        );
        assert_eq!(
            resolve(&directory, "S3", "/a/b", ResolveOptions::dir()).unwrap(),
            "S3:a/b/"
        );
    }

    #[test]
    fn unknown_storage_is_not_found() {
        let directory = directory();
        for opts in [
            ResolveOptions::file(),
            ResolveOptions::dir(),
            ResolveOptions::container(),
            ResolveOptions::remote(false),
        ] {
            assert_eq!(resolve(&directory, "Missing", "/a", opts), None);
        }
    }

    #[test]
    fn openlist_addresses_always_use_bridge() {
        let directory = directory();
        for path in ["", "/", "/a", "a/b/", "\\x\\y"] {
            for opts in [ResolveOptions::file(), ResolveOptions::dir(), ResolveOptions::container()] {
                let address = resolve(&directory, "Alist", path, opts).unwrap();
                assert!(address.starts_with(&format!("{BRIDGE}:")), "{address}");
                assert!(!address.starts_with("Alist:"));
            }
        }
        // lookup by mount path resolves to the same storage
        assert_eq!(
            resolve(&directory, "/gdrive", "/a", ResolveOptions::file()).unwrap(),
            format!("{BRIDGE}:Alist/a")
        );
    }

    #[test]
    fn split_container_and_remote() {
        let directory = directory();
        assert_eq!(
            resolve(&directory, "S3", "/a/b.txt", ResolveOptions::container()).unwrap(),
            "S3:"
        );
        assert_eq!(
            resolve(&directory, "S3", "/a/b.txt", ResolveOptions::remote(false)).unwrap(),
            "a/b.txt"
        );
        assert_eq!(
            resolve(&directory, "Alist", "/a/b.txt", ResolveOptions::remote(false)).unwrap(),
            "Alist/a/b.txt"
        );
    }

    #[test]
    fn root_has_no_component() {
        let directory = directory();
        assert_eq!(resolve(&directory, "S3", "/", ResolveOptions::dir()).unwrap(), "S3:");
        assert_eq!(
            resolve(&directory, "Alist", "/", ResolveOptions::dir()).unwrap(),
            format!("{BRIDGE}:Alist/")
        );
    }
}
