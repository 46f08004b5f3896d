use std::fmt;

use crate::error::{KilnErrorExt, Level};
use crate::ir::VerificationError;
use crate::location::{IrLocation, Location};
use crate::transform::{LoweringError, PreconditionViolation};

/// Invalid pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub fn new(message: String) -> Self {
        ConfigError { message }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl KilnErrorExt for ConfigError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        "kiln.pipeline.config".to_string()
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        None
    }
}

/// The point at which a verification gate rejected the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    Input,
    Optimizations,
    Gc,
}

impl VerifyStage {
    pub fn describe(&self) -> &'static str {
        match self {
            VerifyStage::Input => "input module failed verification",
            VerifyStage::Optimizations => "optimizations caused a verification failure",
            VerifyStage::Gc => "GC pass caused a verification failure",
        }
    }
}

/// Why a pipeline run stopped. The module is left in whatever state the
/// failing phase produced and must be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationError {
    Precondition(PreconditionViolation),
    Verification { stage: VerifyStage, source: VerificationError },
    Lowering(LoweringError),
}

impl fmt::Display for OptimizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationError::Precondition(e) => write!(f, "{}", e),
            OptimizationError::Verification { stage, .. } => write!(f, "{}", stage.describe()),
            OptimizationError::Lowering(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for OptimizationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OptimizationError::Precondition(e) => Some(e),
            OptimizationError::Verification { source, .. } => Some(source),
            OptimizationError::Lowering(e) => Some(e),
        }
    }
}

impl KilnErrorExt for OptimizationError {
    fn level(&self) -> Level {
        match self {
            OptimizationError::Precondition(e) => e.level(),
            OptimizationError::Verification { .. } => Level::Error,
            OptimizationError::Lowering(e) => e.level(),
        }
    }

    fn message(&self) -> String {
        match self {
            OptimizationError::Precondition(e) => e.message(),
            OptimizationError::Verification { stage, source } => {
                format!("{}: {}", stage.describe(), source.message())
            }
            OptimizationError::Lowering(e) => e.message(),
        }
    }

    fn issuer(&self) -> String {
        match self {
            OptimizationError::Precondition(e) => e.issuer(),
            OptimizationError::Verification { source, .. } => source.issuer(),
            OptimizationError::Lowering(e) => e.issuer(),
        }
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        match self {
            OptimizationError::Precondition(e) => e.ir_location(),
            OptimizationError::Verification { source, .. } => source.ir_location(),
            OptimizationError::Lowering(e) => e.ir_location(),
        }
    }
}
