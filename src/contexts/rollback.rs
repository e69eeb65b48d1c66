use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{RollbackError, RollbackReport};

use super::PipelineConfig;

/// Restores every file touched by earlier runs from its backup copy.
///
/// Backups are discovered by suffix scan rather than from a run report, so
/// rollback works even when the report was lost or the run crashed midway.
/// Restoration is per-file: one unreadable backup is recorded as an error
/// and the remaining files are still restored.
pub struct RollbackEngine<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        RollbackEngine { config }
    }

    /// Restores all backups under `root`. When `delete_backups` is set,
    /// successfully restored backups are removed afterwards; backups whose
    /// restore failed are always kept.
    pub fn rollback(&self, root: &Path, delete_backups: bool) -> std::io::Result<RollbackReport> {
        fs::read_dir(root)?;

        let mut backups = Vec::new();
        self.collect_backups(root, &mut backups);
        backups.sort();

        let mut report = RollbackReport::default();
        for backup in backups {
            let Some(original) = self.original_path(&backup) else {
                continue;
            };

            if !original.exists() {
                // The instrumented file is gone; restoring would resurrect
                // content the repo no longer wants. Keep the backup and let
                // the operator decide.
                report.errors.push(RollbackError {
                    backup: backup.to_string_lossy().into_owned(),
                    message: format!("original file {} is missing", original.display()),
                });
                continue;
            }

            if let Err(err) = fs::copy(&backup, &original) {
                report.errors.push(RollbackError {
                    backup: backup.to_string_lossy().into_owned(),
                    message: format!("restore failed: {}", err),
                });
                continue;
            }

            report.restored += 1;
            report
                .restored_files
                .push(original.to_string_lossy().into_owned());

            if delete_backups {
                match fs::remove_file(&backup) {
                    Ok(()) => report.deleted += 1,
                    Err(err) => report.errors.push(RollbackError {
                        backup: backup.to_string_lossy().into_owned(),
                        message: format!("delete failed: {}", err),
                    }),
                }
            }
        }

        Ok(report)
    }

    fn collect_backups(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if path.is_dir() {
                if !self.config.excluded_dirs.iter().any(|d| d == name) {
                    self.collect_backups(&path, out);
                }
            } else if name.ends_with(&self.config.backup_suffix) {
                out.push(path);
            }
        }
    }

    fn original_path(&self, backup: &Path) -> Option<PathBuf> {
        let name = backup.file_name()?.to_str()?;
        let original = name.strip_suffix(self.config.backup_suffix.as_str())?;
        if original.is_empty() {
            return None;
        }
        Some(backup.with_file_name(original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestRepo {
        root: PathBuf,
    }

    impl TestRepo {
        fn new(label: &str) -> Self {
            let root = PathBuf::from(format!(
                "/tmp/tagsmith_test_{}_{}",
                std::process::id(),
                label
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("src")).unwrap();
            TestRepo { root }
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.root.join(rel)).unwrap()
        }
    }

    impl Drop for TestRepo {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_restores_modified_files() {
        let repo = TestRepo::new("rollback_basic");
        repo.write("src/App.js", "instrumented\n");
        repo.write("src/App.js.taggingai.bak", "original\n");
        repo.write("src/Other.js", "untouched\n");

        let config = PipelineConfig::default();
        let report = RollbackEngine::new(&config)
            .rollback(&repo.root, false)
            .unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.deleted, 0);
        assert!(report.errors.is_empty());
        assert_eq!(repo.read("src/App.js"), "original\n");
        assert_eq!(repo.read("src/Other.js"), "untouched\n");
        // Backup kept for a later rollback.
        assert!(repo.root.join("src/App.js.taggingai.bak").exists());
    }

    #[test]
    fn test_delete_backups_after_restore() {
        let repo = TestRepo::new("rollback_delete");
        repo.write("src/App.js", "instrumented\n");
        repo.write("src/App.js.taggingai.bak", "original\n");

        let config = PipelineConfig::default();
        let report = RollbackEngine::new(&config)
            .rollback(&repo.root, true)
            .unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.deleted, 1);
        assert!(!repo.root.join("src/App.js.taggingai.bak").exists());
    }

    #[test]
    fn test_missing_original_is_reported_not_resurrected() {
        let repo = TestRepo::new("rollback_missing");
        repo.write("src/Gone.js.taggingai.bak", "original\n");

        let config = PipelineConfig::default();
        let report = RollbackEngine::new(&config)
            .rollback(&repo.root, true)
            .unwrap();

        assert_eq!(report.restored, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("missing"));
        // The backup is never deleted when its restore did not happen.
        assert!(repo.root.join("src/Gone.js.taggingai.bak").exists());
        assert!(!repo.root.join("src/Gone.js").exists());
    }

    #[test]
    fn test_excluded_dirs_are_not_scanned() {
        let repo = TestRepo::new("rollback_excluded");
        repo.write("node_modules/dep/index.js", "instrumented\n");
        repo.write("node_modules/dep/index.js.taggingai.bak", "original\n");

        let config = PipelineConfig::default();
        let report = RollbackEngine::new(&config)
            .rollback(&repo.root, false)
            .unwrap();

        assert_eq!(report.restored, 0);
        assert_eq!(repo.read("node_modules/dep/index.js"), "instrumented\n");
    }

    #[test]
    fn test_empty_repo_yields_empty_report() {
        let repo = TestRepo::new("rollback_empty");
        let config = PipelineConfig::default();
        let report = RollbackEngine::new(&config)
            .rollback(&repo.root, false)
            .unwrap();
        assert_eq!(report.restored, 0);
        assert!(report.restored_files.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let config = PipelineConfig::default();
        let result = RollbackEngine::new(&config)
            .rollback(Path::new("/tmp/tagsmith_definitely_missing"), false);
        assert!(result.is_err());
    }
}
