// File selection, naming and scratch-file handling for connector runs

use crate::models::{ExecutionActivity, ExecutionLog};
use crate::transport::RemoteFile;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Compiled import file pattern
#[derive(Debug, Clone)]
pub enum FilePattern {
    Any,
    Matches(Regex),
}

impl FilePattern {
    /// Compile a glob (`*`, `?`) or a `/regex/` pattern; empty matches everything
    pub fn parse(pattern: Option<&str>) -> Result<Self, regex::Error> {
        let pattern = match pattern.map(str::trim) {
            None | Some("") => return Ok(FilePattern::Any),
            Some(p) => p,
        };

        if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let raw = &pattern[1..pattern.len() - 1];
            return Regex::new(raw).map(FilePattern::Matches);
        }

        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Regex::new(&expr).map(FilePattern::Matches)
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        match self {
            FilePattern::Any => true,
            FilePattern::Matches(re) => re.is_match(file_name),
        }
    }
}

/// Attributes of files imported successfully by the previous run
#[derive(Debug, Default)]
pub struct PreviousImports {
    files: HashMap<(i64, String), (DateTime<Utc>, u64)>,
}

impl PreviousImports {
    /// Collect error-free import entries from a connector's latest log
    pub fn from_log(log: Option<&ExecutionLog>) -> Self {
        let mut files = HashMap::new();
        let activities = log.map(|l| l.execution_activities.as_slice()).unwrap_or(&[]);
        for activity in activities {
            let ExecutionActivity::Import(import) = activity else {
                continue;
            };
            for file in &import.processed_files {
                if file.error_message.as_deref().is_some_and(|m| !m.is_empty()) {
                    continue;
                }
                let meta = &file.remote_file_metadata;
                files.insert(
                    (import.specification_id, meta.file_name.clone()),
                    (meta.modified_date, meta.size),
                );
            }
        }
        Self { files }
    }

    /// True when the file was seen by the previous run with identical attributes
    ///
    /// A listing entry without a modified time always counts as changed.
    pub fn is_unchanged(&self, specification_id: i64, file: &RemoteFile) -> bool {
        let Some(modified) = file.modified else {
            return false;
        };
        self.files
            .get(&(specification_id, file.name.clone()))
            .is_some_and(|(m, s)| *m == modified && *s == file.size)
    }
}

/// Modified date recorded for a file; undated listings record the run time
pub fn modified_or_now(file: &RemoteFile) -> DateTime<Utc> {
    file.modified.unwrap_or_else(Utc::now)
}

/// Local scratch name for an imported file
pub fn import_scratch_name(connector_id: i64, specification_id: i64, remote_name: &str) -> String {
    let flat: String = remote_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("import_{}_{}_{}", connector_id, specification_id, flat)
}

/// Resolve an export file name, substituting `{timestamp}` as UTC yyyyMMddHHmmss
pub fn export_file_name(
    template: Option<&str>,
    connector_id: i64,
    specification_id: i64,
    now: DateTime<Utc>,
) -> String {
    let default_template;
    let template = match template.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => {
            default_template = format!("export_{}_{}_{{timestamp}}.csv", connector_id, specification_id);
            default_template.as_str()
        }
    };
    template.replace("{timestamp}", &now.format("%Y%m%d%H%M%S").to_string())
}

/// Scratch file removed when dropped
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportActivity, ImportFileResult, RemoteFileMetadata};
    use chrono::TimeZone;

    #[test]
    fn test_glob_patterns_are_anchored() {
        let pattern = FilePattern::parse(Some("station_*.csv")).unwrap();
        assert!(pattern.is_match("station_01.csv"));
        assert!(!pattern.is_match("station_01.csv.bak"));
        assert!(!pattern.is_match("xstation_01.csv"));
        assert!(!pattern.is_match("Station_01.csv"));

        let single = FilePattern::parse(Some("obs_?.txt")).unwrap();
        assert!(single.is_match("obs_1.txt"));
        assert!(!single.is_match("obs_12.txt"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let pattern = FilePattern::parse(Some("data(1).csv")).unwrap();
        assert!(pattern.is_match("data(1).csv"));
        assert!(!pattern.is_match("data(1)xcsv"));
    }

    #[test]
    fn test_regex_and_empty_patterns() {
        let pattern = FilePattern::parse(Some(r"/^obs_\d{4}\.csv$/")).unwrap();
        assert!(pattern.is_match("obs_2024.csv"));
        assert!(!pattern.is_match("obs_24.csv"));

        assert!(FilePattern::parse(None).unwrap().is_match("anything"));
        assert!(FilePattern::parse(Some("  ")).unwrap().is_match("anything"));
        assert!(FilePattern::parse(Some("/[/")).is_err());
    }

    #[test]
    fn test_export_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            export_file_name(Some("daily_{timestamp}.csv"), 4, 2, now),
            "daily_20240309070501.csv"
        );
        assert_eq!(
            export_file_name(None, 4, 2, now),
            "export_4_2_20240309070501.csv"
        );
        assert_eq!(export_file_name(Some("fixed.csv"), 4, 2, now), "fixed.csv");
    }

    #[test]
    fn test_import_scratch_name_flattens_paths() {
        assert_eq!(
            import_scratch_name(7, 1, "2024/03/obs.csv"),
            "import_7_1_2024_03_obs.csv"
        );
    }

    #[test]
    fn test_previous_imports_ignore_failed_entries() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let entry = |name: &str, error: Option<&str>| ImportFileResult {
            remote_file_metadata: RemoteFileMetadata {
                file_name: name.to_string(),
                modified_date: modified,
                size: 100,
            },
            downloaded_file_name: None,
            processed_file_name: None,
            error_message: error.map(str::to_string),
            unchanged_file: None,
        };
        let log = ExecutionLog {
            id: 1,
            connector_id: 7,
            execution_start_datetime: modified,
            execution_end_datetime: modified,
            execution_activities: vec![ExecutionActivity::Import(ImportActivity {
                file_pattern: "*.csv".to_string(),
                specification_id: 1,
                station_id: None,
                processed_files: vec![entry("a.csv", None), entry("b.csv", Some("boom"))],
                error_message: None,
            })],
            total_errors: 1,
            entry_user_id: 1,
            entry_date_time: modified,
        };

        let listed = |name: &str, modified: Option<DateTime<Utc>>, size: u64| RemoteFile {
            name: name.to_string(),
            modified,
            size,
        };

        let previous = PreviousImports::from_log(Some(&log));
        assert!(previous.is_unchanged(1, &listed("a.csv", Some(modified), 100)));
        assert!(!previous.is_unchanged(1, &listed("a.csv", Some(modified), 101)));
        assert!(!previous.is_unchanged(2, &listed("a.csv", Some(modified), 100)));
        assert!(!previous.is_unchanged(1, &listed("b.csv", Some(modified), 100)));
        assert!(!PreviousImports::from_log(None).is_unchanged(1, &listed("a.csv", Some(modified), 100)));
    }

    #[test]
    fn test_undated_listing_entries_are_never_unchanged() {
        let modified = DateTime::<Utc>::UNIX_EPOCH;
        let log = ExecutionLog {
            id: 1,
            connector_id: 7,
            execution_start_datetime: modified,
            execution_end_datetime: modified,
            execution_activities: vec![ExecutionActivity::Import(ImportActivity {
                file_pattern: "latest.csv".to_string(),
                specification_id: 1,
                station_id: None,
                processed_files: vec![ImportFileResult {
                    remote_file_metadata: RemoteFileMetadata {
                        file_name: "latest.csv".to_string(),
                        modified_date: modified,
                        size: 0,
                    },
                    downloaded_file_name: None,
                    processed_file_name: Some("latest.csv".to_string()),
                    error_message: None,
                    unchanged_file: None,
                }],
                error_message: None,
            })],
            total_errors: 0,
            entry_user_id: 1,
            entry_date_time: modified,
        };
        let undated = RemoteFile {
            name: "latest.csv".to_string(),
            modified: None,
            size: 0,
        };

        let previous = PreviousImports::from_log(Some(&log));
        assert!(!previous.is_unchanged(1, &undated));
        assert!(modified_or_now(&undated) > modified);
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchFile::new(dir.path(), "x.csv");
            std::fs::write(scratch.path(), "data").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());

        // never created
        drop(ScratchFile::new(dir.path(), "missing.csv"));
    }
}
