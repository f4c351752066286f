//! Import profile configuration and the folder-detection algorithm
//! (spec.md §4.5), grounded on the teacher's directory-walk idiom in
//! `casparian_scout` generalized from "find plugin modules" to "find
//! designs".

use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    Flat,
    Nested,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    FolderName,
    ParentFolder,
    Filename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseTransform {
    None,
    Title,
    Lower,
    Upper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model_extensions: HashSet<String>,
    pub archive_extensions: HashSet<String>,
    #[serde(default = "default_min_model_files")]
    pub min_model_files: usize,
    pub structure: Structure,
    #[serde(default)]
    pub model_subfolders: Vec<String>,
    #[serde(default)]
    pub require_preview_folder: bool,
    #[serde(default)]
    pub design_depth: Option<usize>,
}

fn default_min_model_files() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleConfig {
    pub source: TitleSource,
    #[serde(default)]
    pub strip_patterns: Vec<String>,
    #[serde(default = "default_case_transform")]
    pub case_transform: CaseTransform,
}

fn default_case_transform() -> CaseTransform {
    CaseTransform::None
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub wildcard_folders: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub include_root: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProfileConfig {
    pub detection: DetectionConfig,
    pub title: TitleConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

impl ImportProfileConfig {
    /// `standard`: one directory per design, flat model layout.
    pub fn builtin_standard() -> Self {
        Self {
            detection: DetectionConfig {
                model_extensions: ["stl", "3mf", "obj", "step", "stp"].map(String::from).into(),
                archive_extensions: ["zip", "7z", "rar", "tar", "gz"].map(String::from).into(),
                min_model_files: 1,
                structure: Structure::Flat,
                model_subfolders: vec![],
                require_preview_folder: false,
                design_depth: None,
            },
            title: TitleConfig {
                source: TitleSource::FolderName,
                strip_patterns: vec![],
                case_transform: CaseTransform::None,
            },
            preview: PreviewConfig::default(),
            ignore: IgnoreConfig::default(),
        }
    }

    /// `tier-based`: two-level hierarchy, designs live one level deeper.
    pub fn builtin_tier_based() -> Self {
        let mut cfg = Self::builtin_standard();
        cfg.detection.design_depth = Some(1);
        cfg
    }

    /// `flat-archive`: a folder counts as a design once it holds a
    /// single archive, with no minimum model-file requirement.
    pub fn builtin_flat_archive() -> Self {
        let mut cfg = Self::builtin_standard();
        cfg.detection.structure = Structure::Flat;
        cfg
    }

    /// `supported`/`unsupported`: nested model subfolders required.
    pub fn builtin_supported() -> Self {
        let mut cfg = Self::builtin_standard();
        cfg.detection.structure = Structure::Nested;
        cfg.detection.model_subfolders = vec!["models".into(), "stl".into()];
        cfg
    }
}

pub struct Detector<'a> {
    config: &'a ImportProfileConfig,
    ignore_globs: globset::GlobSet,
    preview_globs: globset::GlobSet,
}

pub struct DetectedDesign {
    pub root: PathBuf,
    pub title: String,
}

impl<'a> Detector<'a> {
    pub fn new(config: &'a ImportProfileConfig) -> Self {
        let mut ignore = GlobSetBuilder::new();
        for pattern in &config.ignore.patterns {
            if let Ok(glob) = Glob::new(pattern) {
                ignore.add(glob);
            }
        }
        let mut preview = GlobSetBuilder::new();
        for pattern in &config.preview.wildcard_folders {
            if let Ok(glob) = Glob::new(&pattern.to_lowercase()) {
                preview.add(glob);
            }
        }
        Self {
            config,
            ignore_globs: ignore.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap()),
            preview_globs: preview.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap()),
        }
    }

    fn is_ignored_folder(&self, name: &str) -> bool {
        self.config
            .ignore
            .folders
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
            || self.ignore_globs.is_match(name)
    }

    fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn count_files(&self, dir: &Path, recurse: bool, exts: &HashSet<String>) -> usize {
        let mut count = 0;
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recurse && !self.is_ignored_folder(&entry.file_name().to_string_lossy()) {
                    count += self.count_files(&path, recurse, exts);
                }
            } else if let Some(ext) = Self::extension_of(&path) {
                if exts.contains(&ext) {
                    count += 1;
                }
            }
        }
        count
    }

    fn has_preview_subfolder(&self, dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else { return false };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self
                .config
                .preview
                .folders
                .iter()
                .any(|f| f.eq_ignore_ascii_case(&name))
                || self.preview_globs.is_match(name.to_lowercase())
            {
                return true;
            }
        }
        false
    }

    /// Counts model files at `dir`'s root, plus recursively inside any
    /// configured `model_subfolders` when structure allows nesting.
    fn model_file_count(&self, dir: &Path) -> usize {
        let root_count = self.count_files(dir, false, &self.config.detection.model_extensions);
        if self.config.detection.structure == Structure::Flat {
            return root_count;
        }

        let mut nested = 0;
        for subfolder in &self.config.detection.model_subfolders {
            let path = dir.join(subfolder);
            if path.is_dir() {
                nested += self.count_files(&path, true, &self.config.detection.model_extensions);
            }
        }
        root_count + nested
    }

    fn archive_file_count(&self, dir: &Path) -> usize {
        self.count_files(dir, false, &self.config.detection.archive_extensions)
    }

    fn is_design_folder(&self, dir: &Path) -> bool {
        if self.config.detection.require_preview_folder && !self.has_preview_subfolder(dir) {
            return false;
        }
        self.model_file_count(dir) >= self.config.detection.min_model_files
            || self.archive_file_count(dir) >= 1
    }

    fn depth_of(root: &Path, dir: &Path) -> usize {
        dir.strip_prefix(root).map(|p| p.components().count()).unwrap_or(0)
    }

    /// Depth-first walk from `root`, producing one `DetectedDesign` per
    /// folder the algorithm accepts. Does not recurse into an accepted
    /// design folder (step 6: sub-designs are not supported).
    pub fn detect(&self, root: &Path) -> Vec<DetectedDesign> {
        let mut found = Vec::new();
        self.walk(root, root, &mut found);
        found
    }

    fn walk(&self, scan_root: &Path, dir: &Path, found: &mut Vec<DetectedDesign>) {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if dir != scan_root && self.is_ignored_folder(&name) {
            return;
        }

        if let Some(depth) = self.config.detection.design_depth {
            if Self::depth_of(scan_root, dir) == depth {
                let has_models = self.model_file_count(dir) > 0 || self.recursive_model_count(dir) > 0;
                let has_archives = self.archive_file_count(dir) > 0;
                if has_models || has_archives {
                    found.push(self.to_detected(dir));
                }
                return;
            }
        } else if dir != scan_root && self.is_design_folder(dir) {
            found.push(self.to_detected(dir));
            return;
        }

        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk(scan_root, &path, found);
            }
        }
    }

    fn recursive_model_count(&self, dir: &Path) -> usize {
        self.count_files(dir, true, &self.config.detection.model_extensions)
    }

    fn to_detected(&self, dir: &Path) -> DetectedDesign {
        let name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let parent_name = dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let raw = match self.config.title.source {
            TitleSource::FolderName => name,
            TitleSource::ParentFolder => parent_name,
            TitleSource::Filename => name,
        };

        let mut title = raw.clone();
        for pattern in &self.config.title.strip_patterns {
            title = title.replace(pattern.as_str(), "");
        }
        title = match self.config.title.case_transform {
            CaseTransform::None => title,
            CaseTransform::Lower => title.to_lowercase(),
            CaseTransform::Upper => title.to_uppercase(),
            CaseTransform::Title => title
                .split_whitespace()
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        };
        if title.trim().is_empty() {
            title = raw;
        }

        DetectedDesign {
            root: dir.to_path_buf(),
            title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn standard_profile_detects_one_dir_per_design() {
        let dir = tempdir().unwrap();
        let goblin = dir.path().join("Cool Goblin");
        fs::create_dir(&goblin).unwrap();
        fs::write(goblin.join("goblin.stl"), b"x").unwrap();

        let config = ImportProfileConfig::builtin_standard();
        let detector = Detector::new(&config);
        let found = detector.detect(dir.path());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Cool Goblin");
    }

    #[test]
    fn does_not_recurse_into_an_accepted_design_folder() {
        let dir = tempdir().unwrap();
        let goblin = dir.path().join("Cool Goblin");
        let nested = goblin.join("variant");
        fs::create_dir_all(&nested).unwrap();
        fs::write(goblin.join("goblin.stl"), b"x").unwrap();
        fs::write(nested.join("goblin_v2.stl"), b"x").unwrap();

        let config = ImportProfileConfig::builtin_standard();
        let detector = Detector::new(&config);
        let found = detector.detect(dir.path());

        assert_eq!(found.len(), 1);
    }

    #[test]
    fn ignored_folders_are_skipped_entirely() {
        let dir = tempdir().unwrap();
        let trash = dir.path().join("_trash");
        fs::create_dir(&trash).unwrap();
        fs::write(trash.join("junk.stl"), b"x").unwrap();

        let mut config = ImportProfileConfig::builtin_standard();
        config.ignore.folders.push("_trash".into());
        let detector = Detector::new(&config);
        let found = detector.detect(dir.path());

        assert!(found.is_empty());
    }

    #[test]
    fn nested_structure_counts_model_subfolder_files() {
        let dir = tempdir().unwrap();
        let design = dir.path().join("Dragon");
        let models = design.join("models");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("dragon.stl"), b"x").unwrap();

        let config = ImportProfileConfig::builtin_supported();
        let detector = Detector::new(&config);
        let found = detector.detect(dir.path());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Dragon");
    }
}
