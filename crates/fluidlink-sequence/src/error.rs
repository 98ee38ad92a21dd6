/// Errors raised while building sequences from a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactoryError {
    /// A parameter the template needs was not supplied.
    #[error("{template}: missing parameter `{parameter}`")]
    MissingParameter {
        template: &'static str,
        parameter: &'static str,
    },

    /// A parameter is outside the range the hardware accepts.
    #[error("{template}: `{parameter}` = {value} is outside {min}..={max}")]
    OutOfRange {
        template: &'static str,
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors that can occur while scheduling or controlling sequences.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] fluidlink_link::LinkError),

    /// Sequence construction failed.
    #[error("factory error: {0}")]
    Factory(#[from] FactoryError),

    /// A background thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scheduler state lock was poisoned.
    #[error("scheduler state poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
