use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level_str = match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        write!(f, "{}", level_str)
    }
}

/// Common surface of every error the crate reports.
///
/// `location` points into IR source text (parse errors), `ir_location`
/// points at a function/block/instruction of an in-memory module.
pub trait KilnErrorExt {
    fn level(&self) -> Level;
    fn message(&self) -> String;
    fn issuer(&self) -> String;
    fn location(&self) -> Option<crate::location::Location>;
    fn ir_location(&self) -> Option<crate::location::IrLocation>;
}

impl fmt::Debug for dyn KilnErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc_str = match (self.location(), self.ir_location()) {
            (Some(loc), _) => loc.to_string(),
            (None, Some(ir)) => ir.to_string(),
            (None, None) => "unknown".to_string(),
        };

        write!(
            f,
            "KILN | {} | {} | {} | {}",
            self.level(),
            loc_str,
            self.issuer(),
            self.message()
        )
    }
}

impl fmt::Display for dyn KilnErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
