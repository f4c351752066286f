//! Bulk-folder scanner (spec.md §4.12): walks a local root with the
//! §4.5 detector, fingerprinting each detected design the same way
//! `latticeflow_security::hashing::content_fingerprint` does.

use crate::profile::{Detector, ImportProfileConfig};
use chrono::{DateTime, Utc};
use latticeflow_security::hashing::content_fingerprint;
use std::path::Path;
use walkdir::WalkDir;

pub struct ScannedDesign {
    pub relative_path: String,
    pub title: String,
    pub total_bytes: u64,
    pub max_mtime: DateTime<Utc>,
    pub content_fingerprint: String,
}

pub fn scan(root: &Path, config: &ImportProfileConfig) -> Vec<ScannedDesign> {
    let detector = Detector::new(config);
    let detected = detector.detect(root);

    detected
        .into_iter()
        .map(|design| {
            let (entries, total_bytes, max_mtime) = walk_design(&design.root);
            let fingerprint = content_fingerprint(entries.iter().map(|(p, s)| (p.as_str(), *s)));
            ScannedDesign {
                relative_path: design
                    .root
                    .strip_prefix(root)
                    .unwrap_or(&design.root)
                    .to_string_lossy()
                    .replace('\\', "/"),
                title: design.title,
                total_bytes,
                max_mtime,
                content_fingerprint: fingerprint,
            }
        })
        .collect()
}

fn walk_design(root: &Path) -> (Vec<(String, u64)>, u64, DateTime<Utc>) {
    let mut entries = Vec::new();
    let mut total_bytes = 0u64;
    let mut max_mtime = DateTime::<Utc>::from(std::time::UNIX_EPOCH);

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let size = metadata.len();
        total_bytes += size;
        if let Ok(modified) = metadata.modified() {
            let mtime: DateTime<Utc> = modified.into();
            if mtime > max_mtime {
                max_mtime = mtime;
            }
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((relative, size));
    }

    (entries, total_bytes, max_mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_a_design_and_computes_a_stable_fingerprint() {
        let dir = tempdir().unwrap();
        let design = dir.path().join("Cool Goblin");
        fs::create_dir(&design).unwrap();
        fs::write(design.join("goblin.stl"), vec![0u8; 128]).unwrap();

        let config = ImportProfileConfig::builtin_standard();
        let first = scan(dir.path(), &config);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].total_bytes, 128);

        let second = scan(dir.path(), &config);
        assert_eq!(first[0].content_fingerprint, second[0].content_fingerprint);
    }
}
