//! Line sources at the head of the pipeline

use super::{LineSource, StageContext};
use printlink_core::PipelineError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A loaded G-code job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcodeJob {
    name: String,
    lines: Arc<Vec<String>>,
}

impl GcodeJob {
    /// Build a job from lines
    pub fn from_lines<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            lines: Arc::new(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// Build a job from file contents
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::from_lines(name, text.lines().map(|line| line.trim_end_matches('\r')))
    }

    /// Read a job from disk
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::JobLoad {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("Loaded job {} ({} bytes)", name, text.len());
        Ok(Self::from_text(name, &text))
    }

    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the job has no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line at an index
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }
}

/// Source-line progress of a job, shared with the link for reporting
#[derive(Debug, Default)]
pub struct JobProgress {
    total: AtomicUsize,
    read: AtomicUsize,
}

impl JobProgress {
    fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            read: AtomicUsize::new(0),
        }
    }

    /// Lines handed to the pipeline so far
    pub fn lines_read(&self) -> usize {
        self.read.load(Ordering::Relaxed)
    }

    /// Lines in the job
    pub fn total_lines(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Percent of the job's lines handed to the pipeline
    pub fn percent(&self) -> f64 {
        let total = self.total_lines();
        if total == 0 {
            return 100.0;
        }
        self.lines_read() as f64 * 100.0 / total as f64
    }
}

/// Yields a job's lines in order
#[derive(Debug)]
pub struct JobSource {
    job: GcodeJob,
    index: usize,
    progress: Arc<JobProgress>,
}

impl JobSource {
    /// Start at the first line
    pub fn new(job: GcodeJob) -> Self {
        let progress = Arc::new(JobProgress::new(job.len()));
        Self {
            job,
            index: 0,
            progress,
        }
    }

    /// Shared progress counter
    pub fn progress(&self) -> Arc<JobProgress> {
        Arc::clone(&self.progress)
    }

    /// The job being read
    pub fn job(&self) -> &GcodeJob {
        &self.job
    }

    /// Next line without needing a pipeline context
    pub fn read_line(&mut self) -> Option<String> {
        let line = self.job.line(self.index)?.to_string();
        self.index += 1;
        self.progress.read.store(self.index, Ordering::Relaxed);
        Some(line)
    }
}

impl LineSource for JobSource {
    fn next_line(&mut self, _ctx: &mut StageContext<'_>) -> Option<String> {
        self.read_line()
    }

    fn is_finished(&self) -> bool {
        self.index >= self.job.len()
    }
}

/// Source used while no job is loaded
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleSource;

impl LineSource for IdleSource {
    fn next_line(&mut self, _ctx: &mut StageContext<'_>) -> Option<String> {
        None
    }

    fn is_finished(&self) -> bool {
        true
    }
}
