//! Persistent record of the last published version code.
//!
//! The record is a plain-text file holding one decimal integer. A missing or
//! unreadable record means "nothing published yet": the next extracted version
//! passes the gate and the mirror self-heals.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::gate::NO_PRIOR_VERSION;
use crate::core::types::VersionCode;

/// Storage for the last published version code.
pub trait VersionStore {
    /// Last recorded code, or `None` when nothing usable is recorded.
    fn load(&self) -> Option<VersionCode>;
    /// Overwrite the record with `code`.
    fn save(&self, code: VersionCode) -> Result<()>;
}

/// [`VersionStore`] backed by a single text file.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling `<file name>.tmp`, distinct from the record whatever its name.
    fn tmp_path(&self) -> Result<PathBuf> {
        let mut name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("version file {} has no file name", self.path.display()))?
            .to_os_string();
        name.push(".tmp");
        Ok(self.path.with_file_name(name))
    }
}

impl VersionStore for FileVersionStore {
    fn load(&self) -> Option<VersionCode> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no version recorded yet");
                return NO_PRIOR_VERSION;
            }
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "cannot read version record");
                return NO_PRIOR_VERSION;
            }
        };
        match raw.trim().parse::<VersionCode>() {
            Ok(code) => {
                debug!(code, "loaded last published version");
                Some(code)
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    contents = %raw.trim(),
                    err = %err,
                    "ignoring unparseable version record"
                );
                NO_PRIOR_VERSION
            }
        }
    }

    fn save(&self, code: VersionCode) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let tmp_path = self.tmp_path()?;
        fs::write(&tmp_path, format!("{code}\n"))
            .with_context(|| format!("write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        info!(code, path = %self.path.display(), "recorded published version");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_no_prior_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("version.txt"));
        assert_eq!(store.load(), NO_PRIOR_VERSION);
    }

    #[test]
    fn save_then_load_returns_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("state/version.txt"));
        store.save(1043).expect("save");
        assert_eq!(store.load(), Some(1043));
        assert_eq!(
            fs::read_to_string(store.path()).expect("read"),
            "1043\n"
        );
    }

    #[test]
    fn save_overwrites_previous_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("version.txt"));
        store.save(7).expect("first");
        store.save(8).expect("second");
        assert_eq!(store.load(), Some(8));
    }

    #[test]
    fn record_named_like_a_temp_file_survives_save() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("last.tmp"));
        store.save(12).expect("save");
        assert_eq!(store.load(), Some(12));
        assert_eq!(store.tmp_path().expect("tmp"), temp.path().join("last.tmp.tmp"));
        assert!(!temp.path().join("last.tmp.tmp").exists());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("version.txt"));
        fs::write(store.path(), "  42\r\n").expect("write");
        assert_eq!(store.load(), Some(42));
    }

    #[test]
    fn unparseable_record_loads_as_no_prior_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileVersionStore::new(temp.path().join("version.txt"));
        for contents in ["", "abc", "-3", "12 (1.2)"] {
            fs::write(store.path(), contents).expect("write");
            assert_eq!(store.load(), NO_PRIOR_VERSION, "contents {contents:?}");
        }
    }
}
