//! Execution status codes reported in every response frame.

/// Outcome of the most recent command, as reported by the controller.
///
/// The mapping from the wire byte is total: any code outside the five
/// general statuses is carried as a [`DomainCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    /// The command finished successfully.
    CompletedOk,
    /// The command was accepted and is still running.
    InProgress,
    /// The controller received a command with a bad checksum.
    ChecksumError,
    /// The opcode or its arguments were rejected.
    InvalidCommand,
    /// The command failed while executing.
    ExecutionError,
    /// A command-specific failure code.
    Domain(DomainCode),
}

/// Command-specific failure code reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainCode(pub u8);

impl DomainCode {
    /// The bubble sensor never saw air while emptying the line.
    pub const EMPTYING_LINE_FAILED: DomainCode = DomainCode(100);
    /// A pre-use pressure or vacuum check did not hold.
    pub const PREUSE_CHECK_FAILED: DomainCode = DomainCode(110);

    /// Returns a human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::EMPTYING_LINE_FAILED => "emptying the fluidic line failed",
            Self::PREUSE_CHECK_FAILED => "pre-use check failed",
            _ => "unknown controller error",
        }
    }

    /// Returns true for a failed pre-use check, which is a measurement
    /// rather than a fault.
    pub fn is_preuse_check(self) -> bool {
        self == Self::PREUSE_CHECK_FAILED
    }
}

impl std::fmt::Display for DomainCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

impl ExecutionStatus {
    /// Short stable name for logs and tables.
    pub fn name(self) -> &'static str {
        match self {
            Self::CompletedOk => "completed",
            Self::InProgress => "in_progress",
            Self::ChecksumError => "checksum_error",
            Self::InvalidCommand => "invalid_command",
            Self::ExecutionError => "execution_error",
            Self::Domain(_) => "domain_error",
        }
    }

    /// Returns true if the command has stopped running.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl From<u8> for ExecutionStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::CompletedOk,
            1 => Self::InProgress,
            2 => Self::ChecksumError,
            3 => Self::InvalidCommand,
            4 => Self::ExecutionError,
            other => Self::Domain(DomainCode(other)),
        }
    }
}

impl From<ExecutionStatus> for u8 {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::CompletedOk => 0,
            ExecutionStatus::InProgress => 1,
            ExecutionStatus::ChecksumError => 2,
            ExecutionStatus::InvalidCommand => 3,
            ExecutionStatus::ExecutionError => 4,
            ExecutionStatus::Domain(code) => code.0,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(code) => write!(f, "{code}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Returns a name for the controller's internal program byte.
pub fn program_name(program: u8) -> &'static str {
    match program {
        0 => "idle",
        1 => "load_medium_start",
        2 => "load_medium",
        3 => "vent",
        4 => "unload_start",
        5 => "clear_start",
        6 => "preuse_check_pressure",
        7 => "preuse_check_vacuum",
        8 => "bubble_start",
        9 => "bubble_finish",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_round_trips() {
        for value in 0..=u8::MAX {
            let status = ExecutionStatus::from(value);
            assert_eq!(u8::from(status), value);
        }
    }

    #[test]
    fn domain_codes_are_named() {
        assert_eq!(
            ExecutionStatus::from(100),
            ExecutionStatus::Domain(DomainCode::EMPTYING_LINE_FAILED)
        );
        assert!(DomainCode(110).is_preuse_check());
        assert!(!DomainCode(100).is_preuse_check());
        assert_eq!(DomainCode(77).description(), "unknown controller error");
    }

    #[test]
    fn only_in_progress_is_not_final() {
        assert!(!ExecutionStatus::InProgress.is_final());
        assert!(ExecutionStatus::CompletedOk.is_final());
        assert!(ExecutionStatus::ChecksumError.is_final());
        assert!(ExecutionStatus::Domain(DomainCode(200)).is_final());
    }

    #[test]
    fn program_names() {
        assert_eq!(program_name(0), "idle");
        assert_eq!(program_name(7), "preuse_check_vacuum");
        assert_eq!(program_name(42), "unknown");
    }

    #[test]
    fn display_includes_domain_code() {
        let text = ExecutionStatus::Domain(DomainCode::PREUSE_CHECK_FAILED).to_string();
        assert!(text.contains("110"));
        assert_eq!(ExecutionStatus::ChecksumError.to_string(), "checksum_error");
    }
}
