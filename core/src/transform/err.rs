use crate::error::{KilnErrorExt, Level};
use crate::location::{IrLocation, Location};

/// A frontend invariant that the pipeline relies on does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionViolation {
    level: Level,
    message: String,
    issuer: String,
    ir_location: Option<IrLocation>,
}

impl PreconditionViolation {
    pub fn new(message: String, issuer: String, ir_location: Option<IrLocation>) -> Self {
        PreconditionViolation { level: Level::Critical, message, issuer, ir_location }
    }
}

impl std::fmt::Display for PreconditionViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ir_location {
            Some(loc) => write!(f, "{} (at {})", self.message, loc),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PreconditionViolation {}

impl KilnErrorExt for PreconditionViolation {
    fn level(&self) -> Level {
        self.level
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        self.issuer.clone()
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        self.ir_location.clone()
    }
}

/// Task lowering could not transform the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoweringError {
    /// A function that may suspend is called like an ordinary function.
    BlockingCall { caller: String, callee: String },
    /// A function that may suspend is used as a first-class value.
    EscapingTask { function: String },
    /// Only functions without a result can be started as tasks.
    NonVoidTask { function: String },
}

impl std::fmt::Display for LoweringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoweringError::BlockingCall { caller, callee } => {
                write!(f, "@{} calls blocking function @{} directly", caller, callee)
            }
            LoweringError::EscapingTask { function } => {
                write!(f, "blocking function @{} is used as a value", function)
            }
            LoweringError::NonVoidTask { function } => {
                write!(f, "cannot start @{} as a task: it returns a value", function)
            }
        }
    }
}

impl std::error::Error for LoweringError {}

impl KilnErrorExt for LoweringError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "kiln.transform.tasks".to_string()
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        let function = match self {
            LoweringError::BlockingCall { caller, .. } => caller,
            LoweringError::EscapingTask { function } | LoweringError::NonVoidTask { function } => function,
        };
        Some(IrLocation::function(function.clone()))
    }
}
