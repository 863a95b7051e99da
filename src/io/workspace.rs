//! Workspace filesystem access.
//!
//! Every generated file goes through one write helper: ensure the parent
//! directory, write a temporary sibling, rename into place. Scanning an
//! existing project builds the file index and dependency graph that seed
//! structured memory when the engine starts inside a non-empty directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Directories never scanned or written into.
const SKIP_DIRS: [&str; 12] = [
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    "dist",
    "build",
    ".mypy_cache",
    ".pytest_cache",
    "target",
    "vendor",
];

/// Extensions treated as source when scanning.
const SOURCE_EXTENSIONS: [&str; 18] = [
    "py", "js", "jsx", "ts", "tsx", "html", "css", "scss", "json", "yaml", "yml", "toml", "md",
    "txt", "sql", "sh", "env", "cfg",
];

/// Files larger than this are skipped during scans.
const MAX_SCAN_BYTES: u64 = 100_000;

/// Write `content` to `rel_path` under `root` atomically.
///
/// The stored file always ends with exactly one newline. Returns the
/// absolute path written.
pub fn write_file(root: &Path, rel_path: &str, content: &str) -> Result<PathBuf> {
    let rel = sanitize_rel_path(rel_path)?;
    let full = root.join(&rel);
    let parent = full
        .parent()
        .ok_or_else(|| anyhow!("path '{rel_path}' has no parent"))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;

    let mut payload = content.trim_end_matches('\n').to_string();
    payload.push('\n');

    let tmp = full.with_extension(match full.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp, &payload).with_context(|| format!("write temp {}", tmp.display()))?;
    std::fs::rename(&tmp, &full).with_context(|| format!("replace {}", full.display()))?;
    debug!(path = %full.display(), bytes = payload.len(), "wrote file");
    Ok(full)
}

pub fn read_file(root: &Path, rel_path: &str) -> Result<String> {
    let full = root.join(sanitize_rel_path(rel_path)?);
    std::fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))
}

/// Reject absolute paths and parent traversal before any disk access.
fn sanitize_rel_path(rel_path: &str) -> Result<PathBuf> {
    let trimmed = rel_path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(anyhow!("empty file path"));
    }
    let path = PathBuf::from(trimmed);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(anyhow!("path '{rel_path}' escapes the workspace")),
        }
    }
    Ok(path)
}

/// Content hash used for embedding invalidation and re-run short-circuits.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One scanned source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub content: String,
}

/// Scan source files under `root`, skipping ignored directories, hidden
/// files, non-source extensions, and oversized files. Paths come back
/// sorted for deterministic downstream behavior.
pub fn scan(root: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    scan_dir(root, root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn scan_dir(root: &Path, dir: &Path, files: &mut Vec<ScannedFile>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
                continue;
            }
            scan_dir(root, &path, files)?;
            continue;
        }
        if name.starts_with('.') && name != ".env" {
            continue;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_SCAN_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        files.push(ScannedFile { path: rel, content });
    }
    Ok(())
}

/// Count scannable source files, for the classifier's size axis.
pub fn source_file_count(root: &Path) -> usize {
    scan(root).map(|files| files.len()).unwrap_or(0)
}

// ── Purpose inference ──────────────────────────────────────────────

static PY_DOCSTRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^(?:#![^\n]*\n)?(?:#[^\n]*\n)*\s*(?:"""(.*?)"""|'''(.*?)''')"#)
        .expect("docstring regex")
});

static JS_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*/\*\*?\s*([^\n*]+)").expect("js comment regex"));

/// Infer a one-line purpose for a file from its name and leading comment.
pub fn infer_purpose(path: &str, content: &str) -> String {
    const CONFIG_FILES: [(&str, &str); 6] = [
        ("package.json", "Node.js package configuration"),
        ("tsconfig.json", "TypeScript configuration"),
        ("requirements.txt", "Python dependencies"),
        ("pyproject.toml", "Python project configuration"),
        ("Dockerfile", "Docker image definition"),
        (".gitignore", "Git ignore rules"),
    ];

    let basename = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some((_, purpose)) = CONFIG_FILES.iter().find(|(name, _)| *name == basename) {
        return purpose.to_string();
    }

    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == "py" {
        if let Some(caps) = PY_DOCSTRING_RE.captures(content) {
            let doc = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if let Some(first) = doc.trim().lines().next() {
                if !first.trim().is_empty() {
                    return crate::core::types::truncate(first.trim(), 100);
                }
            }
        }
    }
    if matches!(ext.as_str(), "js" | "jsx" | "ts" | "tsx") {
        if let Some(caps) = JS_COMMENT_RE.captures(content) {
            return crate::core::types::truncate(caps[1].trim(), 100);
        }
    }

    const NAME_HINTS: [(&str, &str); 10] = [
        ("index", "Entry point"),
        ("main", "Main application entry point"),
        ("server", "Server configuration"),
        ("config", "Configuration"),
        ("utils", "Utility functions"),
        ("models", "Data models"),
        ("routes", "Route definitions"),
        ("auth", "Authentication"),
        ("test", "Tests"),
        ("styles", "Styles"),
    ];
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for (hint, purpose) in NAME_HINTS {
        if stem.contains(hint) {
            return purpose.to_string();
        }
    }
    format!("{ext} source file")
}

// ── Dependency graph ───────────────────────────────────────────────

static PY_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^from\s+(\.?[\w.]+)\s+import").expect("py from regex"));
static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import\s+([\w.]+)").expect("py import regex"));
static JS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:import\s+[^;]*?from\s+|require\s*\(\s*)["'](\.[^"']+)["']"#)
        .expect("js import regex")
});

/// Build a path → imported-paths graph from import statements.
///
/// Only imports that resolve to files inside the workspace are tracked.
pub fn build_dependency_graph(files: &[ScannedFile]) -> BTreeMap<String, Vec<String>> {
    let all: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut graph = BTreeMap::new();

    for file in files {
        let ext = Path::new(&file.path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let deps = match ext.as_str() {
            "py" => python_imports(&file.path, &file.content, &all),
            "js" | "jsx" | "ts" | "tsx" => js_imports(&file.path, &file.content, &all),
            _ => Vec::new(),
        };
        if !deps.is_empty() {
            graph.insert(file.path.clone(), deps);
        }
    }
    graph
}

fn python_imports(path: &str, content: &str, all: &HashSet<&str>) -> Vec<String> {
    let parent = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut deps = Vec::new();

    let mut resolve = |module: &str| {
        let candidate = if let Some(relative) = module.strip_prefix('.') {
            let rel = relative.replace('.', "/");
            if parent.is_empty() {
                format!("{rel}.py")
            } else {
                format!("{parent}/{rel}.py")
            }
        } else {
            format!("{}.py", module.replace('.', "/"))
        };
        if all.contains(candidate.as_str()) && !deps.contains(&candidate) {
            deps.push(candidate);
        }
    };

    for caps in PY_FROM_RE.captures_iter(content) {
        resolve(&caps[1]);
    }
    for caps in PY_IMPORT_RE.captures_iter(content) {
        resolve(&caps[1]);
    }
    deps
}

fn js_imports(path: &str, content: &str, all: &HashSet<&str>) -> Vec<String> {
    let parent = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut deps = Vec::new();

    for caps in JS_IMPORT_RE.captures_iter(content) {
        let rel = caps[1].trim_start_matches("./");
        let base = if parent.is_empty() {
            rel.to_string()
        } else {
            format!("{parent}/{rel}")
        };
        for suffix in ["", ".js", ".jsx", ".ts", ".tsx", "/index.js", "/index.ts"] {
            let candidate = format!("{base}{suffix}");
            if all.contains(candidate.as_str()) {
                if !deps.contains(&candidate) {
                    deps.push(candidate);
                }
                break;
            }
        }
    }
    deps
}
