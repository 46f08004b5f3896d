use serde::{Deserialize, Serialize};

use crate::ir::{BlockId, InstId};

/// A position inside IR source text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Location {
    /// The file in which the location is found.
    pub file: String,
    /// The line number of the location.
    pub line: usize,
    /// The column number of the location.
    pub column: usize,
}

impl Location {
    /// Creates a new `Location`.
    pub fn new(file: String, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A position inside an in-memory module.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct IrLocation {
    /// Name of the enclosing function.
    pub function: String,
    /// Block inside the function, when known.
    pub block: Option<BlockId>,
    /// Instruction inside the block, when known.
    pub inst: Option<InstId>,
}

impl IrLocation {
    pub fn function(name: impl Into<String>) -> Self {
        Self { function: name.into(), block: None, inst: None }
    }

    pub fn at(name: impl Into<String>, block: BlockId, inst: Option<InstId>) -> Self {
        Self { function: name.into(), block: Some(block), inst }
    }
}

impl std::fmt::Display for IrLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.function)?;
        if let Some(block) = self.block {
            write!(f, ":{}", block)?;
        }
        if let Some(inst) = self.inst {
            write!(f, ":{}", inst)?;
        }
        Ok(())
    }
}
