//! Batch failure types shared by the retrieval and compose phases.

use std::fmt;

use crate::compose::ComposeError;
use crate::store::StoreError;
use crate::translate::TranslateError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Object absent in the blob store.
    NotFound,
    /// Authorization or transport failure.
    Access,
    /// Phase deadline exceeded.
    Timeout,
    /// Translator rejected a document.
    Conversion,
    /// State that should be impossible.
    InvariantViolation,
    /// Local filesystem failure.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Access => "access",
            Self::Timeout => "timeout",
            Self::Conversion => "conversion",
            Self::InvariantViolation => "invariant violation",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

impl From<&StoreError> for ErrorKind {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound,
            StoreError::Access { .. } | StoreError::Status { .. } | StoreError::Transport(_) => {
                Self::Access
            }
            StoreError::Io { .. } | StoreError::InvalidKey(_) | StoreError::InvalidLocation(_) => {
                Self::Storage
            }
        }
    }
}

/// Batch phase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Translate,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => f.write_str("fetch"),
            Self::Translate => f.write_str("translate"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// One failed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Filing id or entity id the task worked on.
    pub item: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(item: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn store(item: &str, e: StoreError) -> Self {
        Self::new(item, ErrorKind::from(&e), e.to_string())
    }

    pub fn io(item: &str, e: std::io::Error) -> Self {
        Self::new(item, ErrorKind::Storage, e.to_string())
    }

    pub fn translate(item: &str, e: TranslateError) -> Self {
        Self::new(item, ErrorKind::Conversion, e.to_string())
    }

    pub fn compose(item: &str, e: ComposeError) -> Self {
        Self::new(item, e.kind(), e.to_string())
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.item, self.kind, self.message)
    }
}

/// Aggregate failure of one all-or-nothing phase.
#[derive(Debug, Clone)]
pub struct BatchError {
    pub phase: Phase,
    /// Failures observed before the phase stopped waiting.
    pub failures: Vec<TaskFailure>,
    /// Whether the phase deadline expired.
    pub timed_out: bool,
}

impl BatchError {
    /// Kinds present in this batch, timeout included.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds: Vec<ErrorKind> = self.failures.iter().map(|f| f.kind).collect();
        if self.timed_out {
            kinds.push(ErrorKind::Timeout);
        }
        kinds.dedup();
        kinds
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed", self.phase)?;
        if self.timed_out {
            write!(f, ": deadline exceeded")?;
        }
        if !self.failures.is_empty() {
            write!(f, " ({} task failures)", self.failures.len())?;
            for failure in &self.failures {
                write!(f, "\n  {}", failure)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
