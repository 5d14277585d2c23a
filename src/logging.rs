//! Process-wide logger: level-tagged, timestamped lines appended to
//! `server.log`, with size-triggered rotation.
//!
//! Backs the `tracing` facade used throughout the codebase, matching
//! the teacher's choice of `tracing`/`tracing-subscriber`, but formatted
//! as plain `"YYYY-MM-DD HH:MM:SS [LEVEL] message"` lines rather than
//! JSON, because that is the wire format this server's log file uses.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;

/// Rotation threshold: once appending a line would put the file at or
/// over this size, the active log is renamed and a fresh file started.
const DEFAULT_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

struct Inner {
    path: PathBuf,
    file: File,
    size: u64,
    rotate_at: u64,
}

/// A `tracing_subscriber` writer that appends to a path, rotating it by
/// size. Cheap to clone: every handle shares the same underlying file
/// and write lock.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl RotatingFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_rotate_threshold(path, DEFAULT_ROTATE_BYTES)
    }

    pub fn with_rotate_threshold(path: impl Into<PathBuf>, rotate_at: u64) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { inner: std::sync::Arc::new(Mutex::new(Inner { path, file, size, rotate_at })) })
    }
}

impl Inner {
    fn rotate(&mut self) -> io::Result<()> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let file_name = self.path.file_name().and_then(|n| n.to_str()).unwrap_or("server.log");
        let rotated = self.path.with_file_name(format!("{file_name}_{stamp}"));
        fs::rename(&self.path, &rotated)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for Inner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size + buf.len() as u64 >= self.rotate_at {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// A single borrow of the writer for one `tracing` event.
pub struct RotatingFileWriterGuard(std::sync::Arc<Mutex<Inner>>);

impl Write for RotatingFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileWriterGuard(std::sync::Arc::clone(&self.inner))
    }
}

/// Formats one `tracing` event as `"YYYY-MM-DD HH:MM:SS [LEVEL] message
/// key=value ..."`, matching the level-tagged, timestamped line format
/// called out for `server.log`.
pub struct PlainFormatter;

impl<S, N> FormatEvent<S, N> for PlainFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        write!(writer, "{now} [{}] ", event.metadata().level())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global `tracing` subscriber, appending to `path`.
pub fn init(path: impl AsRef<Path>) -> io::Result<()> {
    let writer = RotatingFileWriter::new(path.as_ref())?;

    let subscriber = tracing_subscriber::fmt()
        .event_format(PlainFormatter)
        .with_writer(writer)
        .with_ansi(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn appends_without_rotating_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let writer = RotatingFileWriter::with_rotate_threshold(&path, 1024).unwrap();
        {
            let mut guard = writer.make_writer();
            guard.write_all(b"hello\n").unwrap();
        }
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn rotates_once_threshold_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let writer = RotatingFileWriter::with_rotate_threshold(&path, 10).unwrap();
        {
            let mut guard = writer.make_writer();
            guard.write_all(b"0123456789").unwrap();
        }
        {
            let mut guard = writer.make_writer();
            guard.write_all(b"more\n").unwrap();
        }

        let mut entries: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        // Original path recreated fresh, plus one rotated file carrying
        // the `_YYYYMMDD_HHMMSS` suffix.
        assert_eq!(entries.len(), 2);
        assert!(path.exists());
    }
}
