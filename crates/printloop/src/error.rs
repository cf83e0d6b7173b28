//! Error types shared by the pipeline stages.

use thiserror::Error;

/// Failure reported by the motion controller or the scanner.
///
/// Only [`MachineError::BufferFull`] is recoverable; the print stream retries
/// it locally. Everything else aborts the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    /// The command queue has no room for another command.
    #[error("command queue buffer full")]
    BufferFull,
    /// Any other hardware fault.
    #[error("hardware fault {code}: {message}")]
    Fault {
        /// Controller-specific fault code.
        code: i32,
        /// Human-readable description reported by the controller.
        message: String,
    },
}

impl MachineError {
    /// Creates a fatal hardware fault.
    pub fn fault(code: i32, message: impl Into<String>) -> Self {
        Self::Fault {
            code,
            message: message.into(),
        }
    }

    /// True for transient backpressure that should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BufferFull)
    }
}

/// Result of a call into the machine or scanner interface.
pub type MachineResult<T> = std::result::Result<T, MachineError>;

/// Errors that abort a pipeline run or reject an input.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal hardware fault.
    #[error("{stage} stage: {source}")]
    Machine {
        /// Stage that observed the fault.
        stage: &'static str,
        /// Underlying fault.
        #[source]
        source: MachineError,
    },

    /// The other end of a stage channel went away (the peer stage aborted).
    #[error("{stage} stage: channel closed by peer")]
    ChannelClosed {
        /// Stage that observed the closed channel.
        stage: &'static str,
    },

    /// A segment measurement was written twice.
    #[error("segment {segment} already has a measurement")]
    AlreadyMeasured {
        /// Segment index.
        segment: usize,
    },

    /// A message referenced a segment that does not exist.
    #[error("segment index {index} out of range (plan has {count} segments)")]
    SegmentOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of segments in the plan.
        count: usize,
    },

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A print plan is inconsistent.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A stage thread panicked.
    #[error("{stage} stage panicked")]
    StagePanicked {
        /// Stage name.
        stage: &'static str,
    },

    /// File I/O failure while reading inputs or writing diagnostics.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// Wraps a hardware fault observed by `stage`.
    pub fn machine(stage: &'static str, source: MachineError) -> Self {
        Self::Machine { stage, source }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an invalid-plan error.
    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan(reason.into())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_buffer_full_is_retryable() {
        assert!(MachineError::BufferFull.is_retryable());
        assert!(!MachineError::fault(39, "axis fault").is_retryable());
    }

    #[test]
    fn machine_error_names_stage() {
        let err = PipelineError::machine("scan", MachineError::fault(7, "trigger lost"));
        let text = err.to_string();
        assert!(text.contains("scan stage"));
        assert!(text.contains("trigger lost"));
    }

    #[test]
    fn out_of_range_reports_count() {
        let err = PipelineError::SegmentOutOfRange { index: 12, count: 10 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10 segments"));
    }
}
