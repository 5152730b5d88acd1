//! Rotating file writer plugged into `tracing-subscriber`

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use crate::logger::config::FileConfig;
use crate::logger::error::LoggerError;
use crate::logger::rotation::RotationManager;

/// File writer shared by every event; rotation is checked before each write
#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<WriterState>>,
    path: PathBuf,
}

struct WriterState {
    file: BufWriter<File>,
    current_size: u64,
    rotation: RotationManager,
    /// Set after an unrecoverable write error; events then go to stderr
    fallback: bool,
}

impl RotatingFileWriter {
    pub fn new(config: &FileConfig) -> Result<Self, LoggerError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = open_log_file(&config.path, config.append)?;
        let current_size = if config.append {
            std::fs::metadata(&config.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            state: Arc::new(Mutex::new(WriterState {
                file,
                current_size,
                rotation: RotationManager::new(config.rotation.clone()),
                fallback: false,
            })),
            path: config.path.clone(),
        })
    }

    pub fn is_in_fallback_mode(&self) -> bool {
        self.state.lock().map(|s| s.fallback).unwrap_or(false)
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            state: self.state.clone(),
            path: self.path.clone(),
        }
    }
}

pub struct RotatingWriterGuard {
    state: Arc<Mutex<WriterState>>,
    path: PathBuf,
}

impl RotatingWriterGuard {
    fn roll_over(&self, state: &mut WriterState) -> io::Result<()> {
        state.file.flush()?;
        state
            .rotation
            .rotate(&self.path)
            .map_err(|e| io::Error::other(e.to_string()))?;
        state.file = open_log_file(&self.path, false)?;
        state.current_size = 0;
        Ok(())
    }

    fn fall_back(&self, state: &mut WriterState, buf: &[u8], error: io::Error) -> io::Result<usize> {
        if is_disk_space_error(&error) {
            let _ = state.rotation.force_cleanup(&self.path);
        }
        state.fallback = true;
        eprintln!("[logger] file write failed, falling back to stderr: {}", error);
        io::stderr().write(buf)
    }
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;

        if state.fallback {
            return io::stderr().write(buf);
        }

        if state.rotation.should_rotate(state.current_size)
            && let Err(e) = self.roll_over(&mut state)
        {
            return self.fall_back(&mut state, buf, e);
        }

        match state.file.write(buf) {
            Ok(written) => {
                state.current_size += written as u64;
                Ok(written)
            }
            Err(e) => self.fall_back(&mut state, buf, e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;

        if state.fallback {
            return io::stderr().flush();
        }
        state.file.flush()
    }
}

impl Drop for RotatingWriterGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.file.flush();
        }
    }
}

#[cfg(unix)]
fn is_disk_space_error(error: &io::Error) -> bool {
    // ENOSPC, EDQUOT
    matches!(error.raw_os_error(), Some(28) | Some(122))
        || error.kind() == io::ErrorKind::StorageFull
}

#[cfg(not(unix))]
fn is_disk_space_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::StorageFull
}

fn open_log_file(path: &Path, append: bool) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;

    Ok(BufWriter::new(file))
}
