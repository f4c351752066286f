//! Home-directory and data-layout resolution (spec.md §6 "Persisted state layout").

use std::path::PathBuf;

/// Root directory for all Latticeflow state: `~/.latticeflow`, or
/// `$LATTICEFLOW_HOME` when set.
pub fn home_dir() -> PathBuf {
    if let Ok(over_ride) = std::env::var("LATTICEFLOW_HOME") {
        return PathBuf::from(over_ride);
    }
    dirs::home_dir()
        .expect("could not determine home directory")
        .join(".latticeflow")
}

/// Paths, all rooted at `home_dir()/data`, matching spec.md §6 layout.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new() -> Self {
        Self {
            root: home_dir().join("data"),
        }
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("app.db")
    }

    pub fn db_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.db_path().display())
    }

    pub fn previews_root(&self) -> PathBuf {
        self.root.join("cache").join("previews")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn staging_dir(&self, design_id: &str) -> PathBuf {
        self.staging_root().join(design_id)
    }

    pub fn staging_gdrive_dir(&self, import_record_id: &str) -> PathBuf {
        self.staging_root()
            .join(format!("gdrive_{}", import_record_id))
    }

    pub fn library_root(&self) -> PathBuf {
        self.root.join("library")
    }

    pub fn telegram_session_path(&self) -> PathBuf {
        self.root.join("telegram_session.session")
    }

    pub fn upload_staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join("upload_staging").join(upload_id)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create every top-level directory this layout will ever write to.
    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [
            self.previews_root(),
            self.staging_root(),
            self.library_root(),
            self.root.join("upload_staging"),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_dir_is_scoped_per_design() {
        let layout = DataLayout::from_root(PathBuf::from("/tmp/lf-test"));
        assert_eq!(
            layout.staging_dir("abc"),
            PathBuf::from("/tmp/lf-test/staging/abc")
        );
    }

    #[test]
    fn db_url_uses_rwc_mode() {
        let layout = DataLayout::from_root(PathBuf::from("/tmp/lf-test"));
        assert!(layout.db_url().ends_with("?mode=rwc"));
    }
}
