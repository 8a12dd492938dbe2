/// Broad error categories.
///
/// Only malformed input aborts the system under evaluation; optimizer
/// non-convergence is reported through `FitOutcome::Failed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched sequence lengths, empty or non-monotone curves.
    InputShape,
    /// Unknown curve type, topology, DOE column or case id.
    UnknownIdentifier,
    /// Operation called in the wrong model state (e.g. predict before fit).
    Precondition,
    /// Invalid bounds, guesses or optimizer options.
    Config,
    /// File access and parse failures in the IO wrappers.
    Io,
    /// Non-finite values where a finite one is mandatory.
    Numerical,
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input_shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputShape, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownIdentifier, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Numerical, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Process exit code used by the `rtd` binary.
    pub fn exit_code(&self) -> u8 {
        match self.kind {
            ErrorKind::InputShape | ErrorKind::UnknownIdentifier | ErrorKind::Config | ErrorKind::Io => 2,
            ErrorKind::Precondition => 3,
            ErrorKind::Numerical => 4,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(AppError::input_shape("x").exit_code(), 2);
        assert_eq!(AppError::precondition("x").exit_code(), 3);
        assert_eq!(AppError::numerical("x").exit_code(), 4);
        assert_eq!(AppError::unknown("nope").to_string(), "nope");
    }
}
