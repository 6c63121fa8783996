// crates/taskflow/src/jobs/error_codes.rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownJobType,
    BadPayload,
    Timeout,
    Panic,
    HandlerFailed,
    WorkerShutdown,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "UNKNOWN_JOB_TYPE" => Some(Self::UnknownJobType),
            "BAD_PAYLOAD" => Some(Self::BadPayload),
            "TIMEOUT" => Some(Self::Timeout),
            "PANIC" => Some(Self::Panic),
            "HANDLER_FAILED" => Some(Self::HandlerFailed),
            "WORKER_SHUTDOWN" => Some(Self::WorkerShutdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownJobType => "UNKNOWN_JOB_TYPE",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::Timeout => "TIMEOUT",
            Self::Panic => "PANIC",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::WorkerShutdown => "WORKER_SHUTDOWN",
        }
    }

    /// Recovers the code from a stored `error` column ("CODE: message").
    pub fn of_error_text(text: &str) -> Option<Self> {
        text.split_once(':').and_then(|(code, _)| Self::from_str(code))
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a handler. Stored on the job as `CODE: message`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HandlerFailed, message)
    }

    pub fn bad_payload(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::BadPayload, err.to_string())
    }

    pub fn unknown_job_type(job_type: &str) -> Self {
        Self::new(
            ErrorCode::UnknownJobType,
            format!("no handler registered for job_type={job_type}"),
        )
    }
}
