use std::path::{Path, PathBuf};

use crate::error::{KilnErrorExt, Level};
use crate::ir::{Module, parse_module};
use crate::location::{IrLocation, Location};

/// The on-disk encodings a module can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Text,
        }
    }
}

/// An IR file loaded into memory.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub format: Format,
}

impl Source {
    pub fn new(path: PathBuf) -> Result<Self, Box<dyn KilnErrorExt>> {
        let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Box::new(MissingSourceError { path: path.clone(), reason: e.to_string() }) as Box<dyn KilnErrorExt>)?;
        let format = Format::from_path(&path);
        Ok(Source { name, path, content, format })
    }

    /// Load every file matching `pattern`, in path order. A pattern without
    /// glob characters names a single file, which must exist.
    pub fn from_glob(pattern: &str) -> Result<Vec<Self>, Box<dyn KilnErrorExt>> {
        let missing = |reason: String| {
            Box::new(MissingSourceError { path: PathBuf::from(pattern), reason }) as Box<dyn KilnErrorExt>
        };
        let entries = glob::glob(pattern).map_err(|e| missing(e.to_string()))?;
        let mut paths: Vec<PathBuf> = entries.filter_map(Result::ok).filter(|p| p.is_file()).collect();
        paths.sort();
        if paths.is_empty() {
            return Err(missing("no matching files".to_string()));
        }
        paths.into_iter().map(Source::new).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn parse_module(&self) -> Result<Module, Box<dyn KilnErrorExt>> {
        match self.format {
            Format::Text => {
                parse_module(&self.content, &self.name).map_err(|e| Box::new(e) as Box<dyn KilnErrorExt>)
            }
            Format::Json => Module::from_json(&self.content).map_err(|e| {
                Box::new(JsonModuleError {
                    file: self.name.clone(),
                    line: e.line(),
                    column: e.column(),
                    message: e.to_string(),
                }) as Box<dyn KilnErrorExt>
            }),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Source: {} at {:?}", self.name, self.path)
    }
}

#[derive(Debug, Clone)]
pub struct MissingSourceError {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for MissingSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing source at {:?}: {}", self.path, self.reason)
    }
}

impl std::error::Error for MissingSourceError {}

impl KilnErrorExt for MissingSourceError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "kiln.source".to_string()
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        None
    }
}

/// A `.json` module that does not deserialize.
#[derive(Debug, Clone)]
pub struct JsonModuleError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for JsonModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid module JSON: {}", self.message)
    }
}

impl std::error::Error for JsonModuleError {}

impl KilnErrorExt for JsonModuleError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "kiln.source.json".to_string()
    }

    fn location(&self) -> Option<Location> {
        Some(Location::new(self.file.clone(), self.line, self.column))
    }

    fn ir_location(&self) -> Option<IrLocation> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn glob_loads_text_and_json_modules() {
        let dir = tempfile::tempdir().unwrap();
        let module = parse_module("module a\ndefine @f() -> void {\nbb0:\n  ret\n}\n", "a.kir").unwrap();
        std::fs::write(dir.path().join("a.kir"), module.to_string()).unwrap();
        let mut json = std::fs::File::create(dir.path().join("b.json")).unwrap();
        json.write_all(module.to_json().unwrap().as_bytes()).unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let sources = Source::from_glob(&pattern).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].format, Format::Json);
        for s in sources.iter() {
            assert_eq!(s.parse_module().unwrap(), module);
        }
    }

    #[test]
    fn missing_files_are_reported() {
        let err = Source::from_glob("/nonexistent/dir/*.kir").unwrap_err();
        assert_eq!(err.issuer(), "kiln.source");
        assert!(Source::new(PathBuf::from("/nonexistent/x.kir")).is_err());
    }
}
