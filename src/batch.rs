//! Batch driver: find every eligible workbook or document under a root and
//! convert it, continuing past failures.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{error, info};
use walkdir::WalkDir;

use crate::convert::{self, ConvertOptions};
use crate::error::{Error, IoContext, Result};
use crate::settings::Settings;

/// Which way a batch converts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Workbooks to documents (pre-commit)
    ToText,
    /// Documents back to workbooks (post-checkout)
    ToPackage,
}

impl Direction {
    /// Name used on the command line and in the log file.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToText => "convert_to_yml",
            Direction::ToPackage => "convert_to_excel",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "convert_to_yml" => Some(Direction::ToText),
            "convert_to_excel" => Some(Direction::ToPackage),
            _ => None,
        }
    }

    fn suffixes(self) -> (&'static str, &'static str) {
        match self {
            Direction::ToText => (".xlsx", ".xlsm"),
            Direction::ToPackage => (".xlsx.yml", ".xlsm.yml"),
        }
    }
}

/// Result for one converted file
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<FileResult>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Whether `file_name` in `dir` should be converted in this direction.
///
/// `excluded` holds directories already joined onto the walk root; anything
/// below one of them is skipped.
pub fn is_eligible(
    direction: Direction,
    settings: &Settings,
    excluded: &[PathBuf],
    dir: &Path,
    file_name: &str,
) -> bool {
    if excluded.iter().any(|x| dir.starts_with(x)) {
        return false;
    }

    let (xlsx, xlsm) = direction.suffixes();
    (file_name.ends_with(xlsx) && settings.convert_xlsx)
        || (file_name.ends_with(xlsm) && settings.convert_xlsm)
}

/// Convert every eligible file under `root`.
///
/// Files are visited in sorted order. A failed file is recorded and the walk
/// goes on; the log file, when enabled, gets one line per file.
pub fn run(root: &Path, direction: Direction, settings: &Settings) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    if !settings.enabled {
        info!("conversion disabled in settings");
        return Ok(report);
    }

    let excluded: Vec<PathBuf> = settings
        .exclude_directories
        .iter()
        .map(|dir| root.join(dir))
        .collect();
    let options = ConvertOptions {
        separate_macro_file: settings.convert_vba_separate_file,
        compress_binary: settings.compress_binary,
        scratch_parent: None,
    };

    let log_path = root.join(&settings.logfile);
    let mut log_file = if settings.enable_logging {
        Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .io_context(|| format!("open log {}", log_path.display()))?,
        )
    } else {
        None
    };

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::io(format!("walk {}", root.display()), e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let dir = path.parent().unwrap_or(root);
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_eligible(direction, settings, &excluded, dir, file_name) {
            continue;
        }

        println!("{}", path.display());
        let start = Instant::now();
        let outcome = match direction {
            Direction::ToText => convert::convert_to_text(path, &options).map(|_| ()),
            Direction::ToPackage => convert::convert_to_package(path, &options).map(|_| ()),
        };
        let elapsed = start.elapsed();

        let result = FileResult {
            path: path.to_path_buf(),
            success: outcome.is_ok(),
            elapsed,
            error: outcome.err().map(|e| {
                error!("{}: {}", path.display(), e);
                e.to_string()
            }),
        };

        if let Some(log) = log_file.as_mut() {
            log.write_all(log_line(direction, &result).as_bytes())
                .io_context(|| format!("write log {}", log_path.display()))?;
        }
        report.results.push(result);
    }

    Ok(report)
}

/// `Wed Oct 15 09:12:01 2026 | convert_to_yml | Success | Execution time: 0.042 seconds | ./Book1.xlsx`
pub fn log_line(direction: Direction, result: &FileResult) -> String {
    format!(
        "{} | {} | {} | Execution time: {:.3} seconds | {}\n",
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y"),
        direction.as_str(),
        if result.success { "Success" } else { "Failure" },
        result.elapsed.as_secs_f64(),
        result.path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_names() {
        for direction in [Direction::ToText, Direction::ToPackage] {
            assert_eq!(Direction::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(Direction::parse("convert_to_pdf"), None);
    }

    #[test]
    fn test_is_eligible() {
        let settings = Settings::default();
        let root = Path::new("repo");
        let excluded = vec![root.join("vendor")];

        assert!(is_eligible(Direction::ToText, &settings, &excluded, root, "Book1.xlsx"));
        assert!(is_eligible(Direction::ToText, &settings, &excluded, root, "Book1.xlsm"));
        assert!(!is_eligible(Direction::ToText, &settings, &excluded, root, "Book1.xlsx.yml"));
        assert!(is_eligible(Direction::ToPackage, &settings, &excluded, root, "Book1.xlsx.yml"));
        assert!(!is_eligible(Direction::ToPackage, &settings, &excluded, root, "Book1.xlsx"));
        assert!(!is_eligible(
            Direction::ToText,
            &settings,
            &excluded,
            &root.join("vendor/deep"),
            "Book1.xlsx"
        ));

        let no_xlsm = Settings {
            convert_xlsm: false,
            ..Settings::default()
        };
        assert!(!is_eligible(Direction::ToText, &no_xlsm, &excluded, root, "Book1.xlsm"));
        assert!(!is_eligible(Direction::ToPackage, &no_xlsm, &excluded, root, "Book1.xlsm.yml"));
    }

    #[test]
    fn test_log_line_format() {
        let result = FileResult {
            path: PathBuf::from("./Book1.xlsx"),
            success: false,
            elapsed: Duration::from_millis(1500),
            error: Some("locked".into()),
        };
        let line = log_line(Direction::ToText, &result);
        assert!(line.ends_with(" | convert_to_yml | Failure | Execution time: 1.500 seconds | ./Book1.xlsx\n"));
    }

    #[test]
    fn test_disabled_settings_convert_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Book1.xlsx"), b"not a zip").unwrap();
        let settings = Settings {
            enabled: false,
            ..Settings::default()
        };
        let report = run(tmp.path(), Direction::ToText, &settings).unwrap();
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.xlsx"), b"not a zip").unwrap();
        std::fs::write(tmp.path().join("b.xlsx"), b"not a zip either").unwrap();
        let settings = Settings {
            enable_logging: true,
            ..Settings::default()
        };

        let report = run(tmp.path(), Direction::ToText, &settings).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failures(), 2);

        let log = std::fs::read_to_string(tmp.path().join(&settings.logfile)).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().all(|l| l.contains("| Failure |")));
    }
}
