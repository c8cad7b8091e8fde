//! Global `tracing` subscriber and the rotated log file.
//!
//! The filter honours `RUST_LOG`. Without it the level is `info`, raised to
//! `debug` by `--verbose` and lowered to `warn` by `--quiet`. Warnings and
//! errors go to stderr, everything else to stdout; either stream can be
//! switched off from the project settings.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, Verbosity};
use crate::error::BootError;

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LogConfig, log_file: Option<&Path>) -> Result<bool, BootError> {
    let default_level = match config.verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = console_writer(config).map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(writer)
    });

    let file = match log_file.filter(|_| config.file_logging) {
        Some(path) => {
            let writer = RotatedFileWriter::open(path, config.max_log_files)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            )
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .is_ok();
    Ok(installed)
}

fn console_writer(config: &LogConfig) -> Option<BoxMakeWriter> {
    match (config.disable_stdout, config.disable_stderr) {
        (false, false) => Some(BoxMakeWriter::new(
            std::io::stderr
                .with_max_level(Level::WARN)
                .or_else(std::io::stdout),
        )),
        (false, true) => Some(BoxMakeWriter::new(std::io::stdout.with_min_level(Level::INFO))),
        (true, false) => Some(BoxMakeWriter::new(std::io::stderr.with_max_level(Level::WARN))),
        (true, true) => None,
    }
}

// ---------------------------------------------------------------------------
// RotatedFileWriter
// ---------------------------------------------------------------------------

/// Log file that keeps a bounded number of timestamped backups.
///
/// Opening renames an existing `log.txt` to `log_<YYYY-MM-DD_HH.MM.SS>.txt`
/// and deletes the oldest backups so that at most `max_files` files remain,
/// the new current one included.
#[derive(Debug, Clone)]
pub struct RotatedFileWriter {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl RotatedFileWriter {
    pub fn open(path: &Path, max_files: u32) -> Result<Self, BootError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| BootError::io(dir, e))?;
        }
        if path.exists() {
            let backup = backup_path(path, &chrono::Local::now().format("%Y-%m-%d_%H.%M.%S").to_string());
            std::fs::rename(path, &backup).map_err(|e| BootError::io(path, e))?;
        }
        prune_backups(path, max_files.saturating_sub(1) as usize)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BootError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for RotatedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

fn split_name(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (stem, ext)
}

fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let (stem, ext) = split_name(path);
    let name = match ext {
        Some(ext) => format!("{stem}_{stamp}.{ext}"),
        None => format!("{stem}_{stamp}"),
    };
    path.with_file_name(name)
}

/// Delete backups of `path`, oldest first, until at most `keep` remain.
fn prune_backups(path: &Path, keep: usize) -> Result<(), BootError> {
    let dir = match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    let (stem, ext) = split_name(path);
    let prefix = format!("{stem}_");
    let suffix = ext.map(|e| format!(".{e}")).unwrap_or_default();

    let entries = std::fs::read_dir(&dir).map_err(|e| BootError::io(&dir, e))?;
    // Timestamps sort lexicographically in chronological order.
    let mut backups: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
        })
        .collect();
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    for old in backups.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&old) {
            tracing::warn!(file = %old.display(), error = %e, "couldn't remove old log file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn existing_log_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/log.txt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous run\n").unwrap();

        let mut writer = RotatedFileWriter::open(&path, 10).unwrap();
        writer.write_all(b"this run\n").unwrap();
        writer.flush().unwrap();

        let names = files_in(path.parent().unwrap());
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.starts_with("log_") && n.ends_with(".txt")));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this run\n");
    }

    #[test]
    fn oldest_backups_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        for day in 1..=5 {
            std::fs::write(backup_path(&path, &format!("2020-01-0{day}_00.00.00")), "").unwrap();
        }

        RotatedFileWriter::open(&path, 3).unwrap();

        assert_eq!(
            files_in(dir.path()),
            vec![
                "log.txt",
                "log_2020-01-04_00.00.00.txt",
                "log_2020-01-05_00.00.00.txt",
            ]
        );
    }

    #[test]
    fn unrelated_files_survive_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        RotatedFileWriter::open(&path, 1).unwrap();
        assert_eq!(files_in(dir.path()), vec!["log.txt", "notes.txt"]);
    }

    #[test]
    fn second_install_is_a_no_op() {
        let config = LogConfig::default();
        init_logging(&config, None).unwrap();
        assert!(!init_logging(&config, None).unwrap());
    }
}
