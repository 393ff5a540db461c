//! Cache key generation utilities.

use md5::{Digest, Md5};

/// Hash a mount path and branch into a lowercase hex digest.
///
/// The digest covers the mount bytes followed by the branch bytes with no
/// delimiter, so `("ab", "c")` and `("a", "bc")` share a key.
pub fn hash_mount(mount: &str, branch: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(mount.as_bytes());
    hasher.update(branch.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolve the remote path `<root>/<repo>/<digest>` for a mount on a branch.
pub fn resolve(root: &str, repo: &str, mount: &str, branch: &str) -> String {
    join_remote(&[root, repo, &hash_mount(mount, branch)])
}

/// Join path components with `/`, dropping empty and `.` segments and
/// resolving `..` against the segments before it.
///
/// A leading `/` on the first non-empty component is kept. All-empty input
/// joins to an empty string.
pub fn join_remote(parts: &[&str]) -> String {
    if parts.iter().all(|p| p.is_empty()) {
        return String::new();
    }

    let absolute = parts
        .iter()
        .find(|p| !p.is_empty())
        .is_some_and(|p| p.starts_with('/'));

    let mut segments: Vec<&str> = Vec::new();
    for segment in parts.iter().flat_map(|p| p.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
