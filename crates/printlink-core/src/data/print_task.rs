//! Print task bookkeeping
//!
//! A `PrintTask` is the record a persistence collaborator keeps for a job:
//! when it started and ended, how far it got, and how many times it was
//! recovered after an interruption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress record for one print job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintTask {
    /// Job name shown to the user
    pub job_name: String,
    /// When printing started
    pub started_at: DateTime<Utc>,
    /// When printing ended, once finalized
    pub ended_at: Option<DateTime<Utc>>,
    /// Completion in percent of job-source lines
    pub percent_done: f64,
    /// Number of times this job was resumed through print recovery
    pub recovery_count: u32,
    /// Whether the job ran to completion
    pub print_complete: bool,
}

impl PrintTask {
    /// Start a new task now
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            started_at: Utc::now(),
            ended_at: None,
            percent_done: 0.0,
            recovery_count: 0,
            print_complete: false,
        }
    }

    /// Check if the task was interrupted part-way and can be recovered
    pub fn is_recoverable(&self) -> bool {
        !self.print_complete && self.percent_done > 0.0 && self.percent_done < 100.0
    }

    /// Update the completion percentage
    pub fn set_progress(&mut self, percent_done: f64) {
        if !self.print_complete {
            self.percent_done = percent_done.clamp(0.0, 100.0);
        }
    }

    /// Commit end time and full completion.
    ///
    /// Returns true only the first time, so finish notifications fire once.
    pub fn finalize(&mut self) -> bool {
        if self.print_complete {
            return false;
        }
        self.ended_at = Some(Utc::now());
        self.percent_done = 100.0;
        self.print_complete = true;
        true
    }

    /// Serialize for a persistence collaborator
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restore a persisted task
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_only_once() {
        let mut task = PrintTask::new("cube.gcode");
        task.set_progress(42.0);
        assert!(task.finalize());
        assert_eq!(task.percent_done, 100.0);
        assert!(task.ended_at.is_some());
        assert!(!task.finalize());
    }

    #[test]
    fn test_recoverable() {
        let mut task = PrintTask::new("cube.gcode");
        assert!(!task.is_recoverable());
        task.set_progress(30.0);
        assert!(task.is_recoverable());
    }

    #[test]
    fn test_json_round_trip_keeps_counters() {
        let mut task = PrintTask::new("benchy.gcode");
        task.set_progress(55.5);
        task.recovery_count = 2;
        let restored = PrintTask::from_json(&task.to_json().unwrap()).unwrap();
        assert_eq!(restored, task);
    }
}
