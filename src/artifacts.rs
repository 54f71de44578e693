//! Versioned artifact writing: copy-revisions and keyword reports saved
//! through the control API, plus archived manager-phase outputs. Each kind
//! gets its own `{base}_v{N}.md` sequence in the job's `project_path`,
//! scanned and incremented idempotently — calling save N times produces
//! exactly N files, v1..vN.

use crate::paths::sanitized_artifact_path;
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    CopyRevision,
    KeywordReport,
    ManagerOutput,
}

impl RevisionKind {
    fn base(&self) -> &'static str {
        match self {
            RevisionKind::CopyRevision => "copy_revision",
            RevisionKind::KeywordReport => "keyword_report",
            RevisionKind::ManagerOutput => "manager_output",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "copy" | "copy_revision" => Some(RevisionKind::CopyRevision),
            "keyword" | "keyword_report" => Some(RevisionKind::KeywordReport),
            other => {
                let _ = other;
                None
            }
        }
    }
}

/// Scan `project_path` for the highest existing `{base}_vN.md`, write the
/// next version, and return its path and version number.
pub fn save_revision(project_path: &str, kind: RevisionKind, content: &str) -> Result<(PathBuf, u32)> {
    let next = next_version(project_path, kind)?;
    let relative = format!("{}_v{next}.md", kind.base());
    let path = sanitized_artifact_path(project_path, &relative)?;
    std::fs::write(&path, content)?;
    Ok((path, next))
}

fn next_version(project_path: &str, kind: RevisionKind) -> Result<u32> {
    let dir = std::path::Path::new(project_path);
    std::fs::create_dir_all(dir)?;
    let prefix = format!("{}_v", kind.base());
    let mut max_version = 0u32;
    for entry in std::fs::read_dir(dir)?.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some(rest) = name.strip_prefix(&prefix) else { continue };
        let Some(num_str) = rest.strip_suffix(".md") else { continue };
        if let Ok(n) = num_str.parse::<u32>() {
            max_version = max_version.max(n);
        }
    }
    Ok(max_version + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_revision_versions_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path().to_str().unwrap();
        for expected in 1..=3u32 {
            let (path, version) = save_revision(project_path, RevisionKind::CopyRevision, "draft").unwrap();
            assert_eq!(version, expected);
            assert!(path.file_name().unwrap().to_str().unwrap().contains(&format!("_v{expected}.md")));
        }
    }

    #[test]
    fn different_kinds_version_independently() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path().to_str().unwrap();
        save_revision(project_path, RevisionKind::CopyRevision, "a").unwrap();
        let (_, version) = save_revision(project_path, RevisionKind::KeywordReport, "b").unwrap();
        assert_eq!(version, 1);
    }
}
