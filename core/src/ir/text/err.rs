use crate::error::{KilnErrorExt, Level};
use crate::location::{IrLocation, Location};

/// A syntax or resolution error in `.kir` text.
#[derive(Debug, Clone)]
pub struct TextError {
    level: Level,
    message: String,
    issuer: String,
    location: Option<Location>,
}

impl TextError {
    pub fn new(message: String, issuer: String, location: Option<Location>) -> Self {
        TextError { level: Level::Error, message, issuer, location }
    }

    pub(crate) fn from_pest(err: pest::error::Error<super::parse::Rule>, file: &str) -> Self {
        let (line, column) = match err.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        let message = match &err.variant {
            pest::error::ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
                let expected: Vec<String> = positives.iter().map(|r| format!("{:?}", r)).collect();
                format!("syntax error, expected {}", expected.join(" | "))
            }
            variant => format!("syntax error: {}", variant.message()),
        };
        TextError::new(
            message,
            "kiln.ir.text.parse".to_string(),
            Some(Location::new(file.to_string(), line, column)),
        )
    }
}

impl std::fmt::Display for TextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{} (at {}:{}:{})", self.message, loc.file, loc.line, loc.column)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for TextError {}

impl KilnErrorExt for TextError {
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
        self.location.clone()
    }

    fn ir_location(&self) -> Option<IrLocation> {
        None
    }
}
