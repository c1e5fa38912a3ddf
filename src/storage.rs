//! Log medium trait and built-in backends.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Append-only, line-oriented storage for the command log.
///
/// The store reads every line once when it opens and afterwards only
/// appends. Appends are serialized by the store, so implementations do not
/// need their own locking.
pub trait LogMedium: Send + 'static {
    /// Read back every previously written line, in write order.
    ///
    /// A medium that has never been written to returns an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the underlying storage cannot be read.
    fn read_lines(&self) -> io::Result<Vec<String>>;

    /// Append `lines`, in order, each terminated by a newline.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the underlying storage cannot be written.
    fn append_lines(&mut self, lines: &[String]) -> io::Result<()>;
}

/// File-backed log: one UTF-8 text file, opened in append mode per flush.
///
/// # Examples
///
/// ```
/// use eventfold_kv::{FileLog, LogMedium};
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut log = FileLog::new(dir.path().join("store.log"));
/// assert!(log.read_lines().unwrap().is_empty());
///
/// log.append_lines(&["AddItem\t{}".to_string()]).unwrap();
/// assert_eq!(log.read_lines().unwrap(), vec!["AddItem\t{}"]);
/// ```
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
    sync: bool,
}

impl FileLog {
    /// Create a log at `path`.
    ///
    /// The file and its parent directories are created lazily on the first
    /// append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync: false,
        }
    }

    /// Call `fsync` after every appended batch.
    ///
    /// Off by default: batches are flushed to the OS, which is enough to
    /// survive a process crash but not a power loss.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogMedium for FileLog {
    fn read_lines(&self) -> io::Result<Vec<String>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        BufReader::new(file).lines().collect()
    }

    fn append_lines(&mut self, lines: &[String]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for line in lines {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        if self.sync {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

/// In-memory log, useful for tests and for stores that do not need to
/// survive the process.
///
/// Clones share the same buffer, so a test can keep one clone to inspect
/// what the store flushed and hand another to a second store to replay it.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    /// Create an empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory log pre-populated with `lines`.
    pub fn with_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Arc::new(Mutex::new(lines.into_iter().map(Into::into).collect())),
        }
    }

    /// Returns a copy of every line written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogMedium for MemoryLog {
    fn read_lines(&self) -> io::Result<Vec<String>> {
        Ok(self.lines())
    }

    fn append_lines(&mut self, lines: &[String]) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(lines.iter().cloned());
        Ok(())
    }
}
