//! Rollover and retention of log files

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Zoned;

use crate::logger::config::{RollingPeriod, RotationConfig, RotationStrategy};
use crate::logger::error::LoggerError;

/// Decides when the active log file rolls over and prunes old archives
pub struct RotationManager {
    config: RotationConfig,
    /// Label of the calendar period the active file belongs to
    current_period: String,
}

impl RotationManager {
    pub fn new(config: RotationConfig) -> Self {
        Self::starting_at(config, &Zoned::now())
    }

    /// Create a manager whose active file was opened at `opened`
    pub fn starting_at(config: RotationConfig, opened: &Zoned) -> Self {
        let current_period = period_label(rolling_period(&config.strategy), opened);
        Self {
            config,
            current_period,
        }
    }

    pub fn should_rotate(&self, current_file_size: u64) -> bool {
        self.should_rotate_at(current_file_size, &Zoned::now())
    }

    pub fn should_rotate_at(&self, current_file_size: u64, now: &Zoned) -> bool {
        let size_exceeded = current_file_size >= self.config.max_size;
        match self.config.strategy {
            RotationStrategy::Size => size_exceeded,
            RotationStrategy::Time(period) => self.period_changed(period, now),
            RotationStrategy::Combined => {
                size_exceeded || self.period_changed(RollingPeriod::Daily, now)
            }
        }
    }

    fn period_changed(&self, period: RollingPeriod, now: &Zoned) -> bool {
        period_label(period, now) != self.current_period
    }

    /// Move the active file aside and prune archives beyond `max_files`.
    ///
    /// Returns the archive path, or `None` when there was nothing to archive.
    pub fn rotate(&mut self, current_path: &Path) -> Result<Option<PathBuf>, LoggerError> {
        self.rotate_at(current_path, &Zoned::now())
    }

    pub fn rotate_at(
        &mut self,
        current_path: &Path,
        now: &Zoned,
    ) -> Result<Option<PathBuf>, LoggerError> {
        let has_content = fs::metadata(current_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let archived = if has_content {
            let target = self.archive_path(current_path, now);
            fs::rename(current_path, &target).map_err(|e| {
                LoggerError::rotation(format!(
                    "failed to move {} to {}: {}",
                    current_path.display(),
                    target.display(),
                    e
                ))
            })?;
            Some(target)
        } else {
            None
        };

        self.current_period = period_label(rolling_period(&self.config.strategy), now);
        self.prune(current_path, self.config.max_files)?;

        Ok(archived)
    }

    /// Drop down to half the retained archives to free disk space
    pub fn force_cleanup(&self, base_path: &Path) -> Result<(), LoggerError> {
        self.prune(base_path, (self.config.max_files / 2).max(1))
    }

    /// Archive name for the file being closed.
    ///
    /// Time-rolled files are named after the period they cover so that a day's
    /// log reads as `perpetua.20261016.log`. Size-rolled files get a timestamp.
    /// A numeric suffix is appended when the name is already taken.
    fn archive_path(&self, base_path: &Path, now: &Zoned) -> PathBuf {
        let label = match self.config.strategy {
            RotationStrategy::Time(_) | RotationStrategy::Combined
                if self.current_period != period_label(rolling_period(&self.config.strategy), now) =>
            {
                self.current_period.clone()
            }
            _ => now.strftime("%Y%m%d_%H%M%S").to_string(),
        };

        let stem = base_path.file_stem().unwrap_or_default().to_string_lossy();
        let ext = base_path.extension().map(|e| e.to_string_lossy());

        let mut attempt = 0usize;
        loop {
            let suffix = if attempt == 0 {
                label.clone()
            } else {
                format!("{}-{}", label, attempt)
            };
            let name = match &ext {
                Some(ext) => format!("{}.{}.{}", stem, suffix, ext),
                None => format!("{}.{}", stem, suffix),
            };
            let candidate = base_path.with_file_name(name);
            if !candidate.exists() {
                return candidate;
            }
            attempt += 1;
        }
    }

    fn prune(&self, base_path: &Path, keep: usize) -> Result<(), LoggerError> {
        let parent = match base_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let stem = base_path.file_stem().unwrap_or_default().to_string_lossy();
        let prefix = format!("{}.", stem);

        let mut archives: Vec<(PathBuf, std::time::SystemTime)> = fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path != base_path
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
            })
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect();

        if archives.len() <= keep {
            return Ok(());
        }

        // newest first; everything past `keep` goes
        archives.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in archives.into_iter().skip(keep) {
            fs::remove_file(&path)?;
        }

        Ok(())
    }
}

fn rolling_period(strategy: &RotationStrategy) -> RollingPeriod {
    match strategy {
        RotationStrategy::Time(period) => *period,
        _ => RollingPeriod::Daily,
    }
}

fn period_label(period: RollingPeriod, at: &Zoned) -> String {
    at.strftime(period.label_pattern()).to_string()
}
