//! Source language detection by file extension.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// TypeScript and JavaScript, including JSX variants.
    Script,
    Python,
    Rust,
    Json,
    Other,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" | "mts" | "cts") => Language::Script,
            Some("py" | "pyi") => Language::Python,
            Some("rs") => Language::Rust,
            Some("json") => Language::Json,
            _ => Language::Other,
        }
    }

    /// Whether `{}`/`()`/`[]` balance is meaningful for this language.
    pub fn checks_brackets(self) -> bool {
        !matches!(self, Language::Other)
    }

    /// Name used in prompts; `None` for free-form files.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Language::Script => Some("TypeScript/JavaScript"),
            Language::Python => Some("Python"),
            Language::Rust => Some("Rust"),
            Language::Json => Some("JSON"),
            Language::Other => None,
        }
    }

    /// Module name a file is imported as (`src/utils.ts` -> `utils`).
    pub fn module_name(path: &str) -> Option<String> {
        Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
    }
}
