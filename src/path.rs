//! Path string canonicalization shared by the resolver, executor and mount handling.
//!
//! Backend addresses are always relative and slash separated: no leading slash, and a
//! trailing slash only when the caller says the path names a directory.

const SEPARATORS: &[char] = &['/', '\\'];

/// Canonicalizes `path` for backend addressing.
pub fn normalize(path: &str, is_dir: bool) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for ch in path.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }

    if out.starts_with('/') {
        out.remove(0);
    }
    // root has no component
    if out.is_empty() {
        return out;
    }

    if is_dir {
        if !out.ends_with('/') {
            out.push('/');
        }
    } else {
        while out.ends_with('/') {
            out.pop();
        }
    }
    out
}

/// Canonical form used to key configured mount points.
pub fn normalize_mount_path(path: &str) -> String {
    let mut out = path.replace('\\', "/");
    if out.ends_with('/') && out.len() > 1 && !is_drive_root(&out) {
        out.pop();
    }
    out
}

fn is_drive_root(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Syntactic directory test used for stored task paths.
pub fn is_dir_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Last non-empty component of `path`.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches(SEPARATORS)
        .rsplit(SEPARATORS)
        .next()
        .unwrap_or("")
}

pub fn join(dir: &str, child: &str) -> String {
    let dir = dir.trim_end_matches(SEPARATORS);
    let child = child.trim_start_matches(SEPARATORS);
    if dir.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        format!("{dir}/")
    } else {
        format!("{dir}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "/",
        "//",
        "a",
        "/a/b.txt",
        "a/b/",
        "\\a\\b\\",
        "//a//b//",
        "C:\\Users\\x",
        "dir/",
    ];

    #[test]
    fn normalize_strips_leading_and_trailing() {
        assert_eq!(normalize("/a/b.txt", false), "a/b.txt");
        assert_eq!(normalize("/a/b/", false), "a/b");
        assert_eq!(normalize("/a/b", true), "a/b/");
        assert_eq!(normalize("\\a\\b\\\\", true), "a/b/");
        assert_eq!(normalize("", true), "");
    }

    #[test]
    fn root_normalizes_to_empty() {
        for root in ["/", "//", "\\"] {
            assert_eq!(normalize(root, true), "");
            assert_eq!(normalize(root, false), "");
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        for sample in SAMPLES {
            for is_dir in [true, false] {
                let once = normalize(sample, is_dir);
                assert_eq!(normalize(&once, is_dir), once, "sample {sample:?}");
            }
        }
    }

    #[test]
    fn normalize_trailing_slash_follows_hint() {
        for sample in SAMPLES.iter().filter(|s| !s.trim_matches('/').is_empty()) {
            let dir = normalize(sample, true);
            assert!(dir.ends_with('/') && !dir.ends_with("//"), "{sample:?} -> {dir:?}");
            assert!(!normalize(sample, false).ends_with('/'), "{sample:?}");
        }
    }

    #[test]
    fn mount_paths_compare_equal_across_separators() {
        assert_eq!(normalize_mount_path("C:\\Users\\x\\"), "C:/Users/x");
        assert_eq!(normalize_mount_path("C:/Users/x"), "C:/Users/x");
        assert_eq!(normalize_mount_path("C:\\"), "C:/");
        assert_eq!(normalize_mount_path("/"), "/");
        assert_eq!(normalize_mount_path("/mnt/gdrive/"), "/mnt/gdrive");
    }

    #[test]
    fn basename_and_join() {
        assert_eq!(basename("/a/b.txt"), "b.txt");
        assert_eq!(basename("/a/photos/"), "photos");
        assert_eq!(basename(""), "");
        assert_eq!(join("/backup/", "photos"), "/backup/photos");
        assert_eq!(join("", "photos"), "photos");
        assert!(is_dir_path("/a/"));
        assert!(!is_dir_path("/a"));
    }
}
