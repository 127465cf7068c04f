//! Project hints for the planner, read from well-known manifests at the root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

const MAX_ENTRIES: usize = 40;
const MAX_DEPENDENCIES: usize = 25;

/// Frameworks recognized from `package.json` dependencies.
const SCRIPT_FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "Next.js"),
    ("react", "React"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("@angular/core", "Angular"),
    ("express", "Express"),
    ("fastify", "Fastify"),
    ("typescript", "TypeScript"),
    ("vite", "Vite"),
    ("jest", "Jest"),
    ("vitest", "Vitest"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHint {
    pub file: &'static str,
    pub summary: String,
}

/// Framework and dependency hints for the workspace root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    pub entries: Vec<String>,
    pub manifests: Vec<ManifestHint>,
}

impl ProjectContext {
    pub fn scan(root: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(root).with_context(|| format!("read {}", root.display()))?;
        for entry in read_dir {
            let entry = entry.with_context(|| format!("read {}", root.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        entries.truncate(MAX_ENTRIES);

        let mut manifests = Vec::new();
        let readers: [(&'static str, fn(&str) -> Option<String>); 6] = [
            ("Cargo.toml", cargo_hint),
            ("package.json", package_json_hint),
            ("pyproject.toml", pyproject_hint),
            ("requirements.txt", requirements_hint),
            ("go.mod", go_mod_hint),
            ("tsconfig.json", |_| Some("TypeScript compiler configuration".to_string())),
        ];
        for (file, reader) in readers {
            let path = root.join(file);
            if !path.is_file() {
                continue;
            }
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            let summary = reader(&contents).unwrap_or_else(|| {
                warn!(file, "could not parse manifest");
                "present (unparsed)".to_string()
            });
            manifests.push(ManifestHint { file, summary });
        }

        debug!(
            entries = entries.len(),
            manifests = manifests.len(),
            "scanned project context"
        );
        Ok(Self { entries, manifests })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.manifests.is_empty()
    }

    /// Plain-text rendering for the planner prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.entries.is_empty() {
            out.push_str(&format!("Top-level entries: {}\n", self.entries.join(", ")));
        }
        for manifest in &self.manifests {
            out.push_str(&format!("- {}: {}\n", manifest.file, manifest.summary));
        }
        out.trim_end().to_string()
    }
}

fn cargo_hint(contents: &str) -> Option<String> {
    let doc: toml::Table = toml::from_str(contents).ok()?;
    let mut summary = match doc.get("package").and_then(|p| p.as_table()) {
        Some(package) => {
            let name = package.get("name").and_then(|v| v.as_str()).unwrap_or("?");
            match package.get("edition").and_then(|v| v.as_str()) {
                Some(edition) => format!("Rust crate `{name}` (edition {edition})"),
                None => format!("Rust crate `{name}`"),
            }
        }
        None if doc.contains_key("workspace") => "Rust workspace".to_string(),
        None => "Rust manifest".to_string(),
    };
    let deps: Vec<&str> = doc
        .get("dependencies")
        .and_then(|d| d.as_table())
        .map(|table| table.keys().map(String::as_str).collect())
        .unwrap_or_default();
    push_dependencies(&mut summary, &deps);
    Some(summary)
}

fn package_json_hint(contents: &str) -> Option<String> {
    let doc: JsonValue = serde_json::from_str(contents).ok()?;
    let name = doc.get("name").and_then(JsonValue::as_str).unwrap_or("?");
    let mut deps: Vec<&str> = Vec::new();
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = doc.get(key).and_then(JsonValue::as_object) {
            deps.extend(map.keys().map(String::as_str));
        }
    }
    deps.sort_unstable();
    deps.dedup();
    let frameworks: Vec<&str> = SCRIPT_FRAMEWORKS
        .iter()
        .filter(|(package, _)| deps.contains(package))
        .map(|(_, label)| *label)
        .collect();

    let mut summary = format!("Node package `{name}`");
    if !frameworks.is_empty() {
        summary.push_str(&format!("; frameworks: {}", frameworks.join(", ")));
    }
    push_dependencies(&mut summary, &deps);
    Some(summary)
}

fn pyproject_hint(contents: &str) -> Option<String> {
    let doc: toml::Table = toml::from_str(contents).ok()?;
    let project = doc.get("project").and_then(|p| p.as_table());
    let name = project
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    let deps: Vec<&str> = project
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(requirement_name)
                .collect()
        })
        .unwrap_or_default();
    let mut summary = format!("Python project `{name}`");
    push_dependencies(&mut summary, &deps);
    Some(summary)
}

fn requirements_hint(contents: &str) -> Option<String> {
    let deps: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(requirement_name)
        .collect();
    let mut summary = "Python requirements".to_string();
    push_dependencies(&mut summary, &deps);
    Some(summary)
}

fn go_mod_hint(contents: &str) -> Option<String> {
    let module = contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("module "))?
        .trim();
    let version = contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("go "))
        .map(str::trim);
    Some(match version {
        Some(version) => format!("Go module `{module}` (go {version})"),
        None => format!("Go module `{module}`"),
    })
}

/// `requests>=2.0 ; python_version < "3.8"` -> `requests`
fn requirement_name(requirement: &str) -> &str {
    let end = requirement
        .find(|c: char| matches!(c, '<' | '>' | '=' | '~' | '!' | ';' | '[' | ' ' | '@'))
        .unwrap_or(requirement.len());
    requirement[..end].trim()
}

fn push_dependencies(summary: &mut String, deps: &[&str]) {
    if deps.is_empty() {
        return;
    }
    let shown: Vec<&str> = deps.iter().take(MAX_DEPENDENCIES).copied().collect();
    summary.push_str(&format!("; dependencies: {}", shown.join(", ")));
    if deps.len() > MAX_DEPENDENCIES {
        summary.push_str(&format!(" (+{} more)", deps.len() - MAX_DEPENDENCIES));
    }
}
