//! Where batch status lines go.
//!
//! A [`LogSink`] is handed to the batch runner, which opens it when a batch
//! starts, writes one line per status message, and closes it when the batch
//! ends.

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt as _,
};

use crate::prelude::*;

/// Name of the log file we keep in the output directory.
pub const LOG_FILE_NAME: &str = "processing_log.txt";

/// A destination for status lines.
#[async_trait]
pub trait LogSink: Send {
    /// Prepare to receive lines.
    async fn open(&mut self) -> Result<()>;

    /// Record one line. Implementations must not buffer it.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Flush and release any resources.
    async fn close(&mut self) -> Result<()>;
}

/// An append-only UTF-8 log file, flushed after every line.
pub struct FileLogSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileLogSink {
    /// A log sink for the standard log file in `output_dir`.
    pub fn in_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(LOG_FILE_NAME))
    }

    /// A log sink writing to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// The path of our log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open log file {:?}", self.path.display()))?;
        self.file = Some(file);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("log file {:?} is not open", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush()
            .await
            .with_context(|| format!("Failed to write log file {:?}", self.path.display()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all()
                .await
                .with_context(|| format!("Failed to close log file {:?}", self.path.display()))?;
        }
        Ok(())
    }
}

/// What a [`MemoryLogSink`] was asked to do.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCall {
    Open,
    Line(String),
    Close,
}

/// Records every call in memory. Clones share the same record, so a test can
/// hand one clone to a runner and inspect the other.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct MemoryLogSink {
    calls: std::sync::Arc<std::sync::Mutex<Vec<SinkCall>>>,
    is_open: bool,
    fail_open: bool,
}

#[cfg(test)]
impl MemoryLogSink {
    /// A sink whose `open` always fails.
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Everything we've been asked to do, in order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LogSink for MemoryLogSink {
    async fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("disk full"));
        }
        self.is_open = true;
        self.calls.lock().unwrap().push(SinkCall::Open);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.is_open {
            return Err(anyhow!("memory log is not open"));
        }
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Line(line.to_owned()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.is_open = false;
        self.calls.lock().unwrap().push(SinkCall::Close);
        Ok(())
    }
}
