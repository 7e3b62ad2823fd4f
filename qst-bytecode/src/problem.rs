use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// What went wrong while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemKind {
    /// The bytecode can't be partitioned consistently: truncated instructions, byte counts that
    /// don't add up. Fatal unless decoding leniently.
    StructuralError,
    /// Something unusual that doesn't prevent decoding.
    DecodeWarning,
}

/// A diagnostic produced while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub kind: ProblemKind,
    pub message: String,
    /// Byte offset the problem refers to, if any.
    pub offset: Option<usize>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.offset {
            Some(offset) => write!(f, "{severity} at offset {offset:#x}: {}", self.message),
            None => write!(f, "{severity}: {}", self.message),
        }
    }
}
