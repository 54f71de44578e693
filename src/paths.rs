//! Artifact path resolution shared by the phase executor and the
//! save-revision API: join a relative artifact name to a job's
//! `project_path`, rejecting any attempt to escape it via `..` or an
//! absolute path.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

pub fn sanitized_artifact_path(project_path: &str, relative: &str) -> Result<PathBuf> {
    let base = Path::new(project_path);
    std::fs::create_dir_all(base)?;
    let base = base.canonicalize()?;
    let candidate = base.join(relative);
    let candidate_parent = candidate.parent().unwrap_or(&base).to_path_buf();
    std::fs::create_dir_all(&candidate_parent)?;
    let resolved_parent = candidate_parent.canonicalize()?;
    if !resolved_parent.starts_with(&base) {
        bail!("artifact path {relative:?} escapes project_path");
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = sanitized_artifact_path(dir.path().to_str().unwrap(), "../../etc/passwd").unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn accepts_simple_relative_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = sanitized_artifact_path(dir.path().to_str().unwrap(), "analyst_output.md").unwrap();
        assert!(path.starts_with(dir.path().canonicalize().unwrap()));
    }
}
