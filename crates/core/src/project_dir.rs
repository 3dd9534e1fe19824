//! Deterministic mapping from a git remote to the local checkout directory.

use std::path::{Path, PathBuf};

/// Resolve the checkout directory for `remote` under `cwd`.
///
/// `git@gitlab.com:cego/example.git` and `https://gitlab.com/cego/example.git`
/// both map to `<cwd>/cego/example`. Pure string transform; the directory is
/// not required to exist.
pub fn dir_for(cwd: &Path, remote: &str) -> PathBuf {
    let trimmed = remote.strip_suffix(".git").unwrap_or(remote);

    let repo_path = if let Some((_, rest)) = trimmed.split_once("://") {
        // URL form: drop the host component
        rest.split_once('/').map(|(_, p)| p).unwrap_or(rest)
    } else if let Some((_, rest)) = trimmed.split_once(':') {
        // scp-like form: user@host:org/repo
        rest
    } else {
        trimmed
    };

    let mut dir = cwd.to_path_buf();
    for segment in repo_path.split('/').filter(|s| !s.is_empty()) {
        dir.push(segment);
    }
    dir
}
