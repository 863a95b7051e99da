//! Static verification and run-command handling.
//!
//! Per-extension checks gate generated files before a task can complete:
//! Python goes through the interpreter's syntax check and an optional
//! linter, JavaScript through `node --check`, JSON through a parse. The
//! [`FileVerifier`] trait is the seam tests use to script pass/fail
//! sequences without real interpreters.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::types::{CancelToken, Check, Diagnostic, ErrorCategory, VerificationResult};
use crate::io::process::{run_with_timeout, CommandOutput};

/// Default wall-clock budget for foreground run commands.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Display truncation for captured command output.
pub const DISPLAY_LINES: usize = 20;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const CHECK_OUTPUT_LIMIT: usize = 100_000;

/// Seam between the orchestrator and the real checkers.
pub trait FileVerifier: Send + Sync {
    fn verify(&self, path: &Path) -> Result<VerificationResult>;
}

/// The production verifier: per-extension subprocess checks.
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier;

impl StaticVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl FileVerifier for StaticVerifier {
    fn verify(&self, path: &Path) -> Result<VerificationResult> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_lowercase();

        let checks = match ext.as_str() {
            "py" => verify_python(path)?,
            "js" | "mjs" | "cjs" => verify_node(path)?,
            "ts" | "tsx" | "jsx" => vec![exists_check("js-exists", path)],
            "json" => verify_json(path)?,
            _ => vec![exists_check("file-exists", path)],
        };

        let passed = checks.iter().all(|c| c.passed);
        let structured_errors = checks
            .iter()
            .filter(|c| !c.passed)
            .flat_map(|c| extract_diagnostics(&c.name, &c.detail))
            .collect();
        debug!(path = %path.display(), passed, "verified file");
        Ok(VerificationResult {
            passed,
            checks,
            structured_errors,
        })
    }
}

fn exists_check(name: &str, path: &Path) -> Check {
    Check {
        name: name.to_string(),
        passed: path.exists(),
        detail: "OK".to_string(),
    }
}

/// Python: syntax first, lint only when syntax passes.
fn verify_python(path: &Path) -> Result<Vec<Check>> {
    let mut checks = Vec::new();

    let mut cmd = Command::new("python3");
    cmd.arg("-m").arg("py_compile").arg(path);
    let output = run_check(cmd, "python-syntax")?;
    let syntax_ok = output.passed;
    checks.push(output);
    if !syntax_ok {
        return Ok(checks);
    }

    if let Some(ruff) = find_in_path("ruff") {
        let mut cmd = Command::new(ruff);
        cmd.arg("check").arg("--select=E,F").arg("--no-fix").arg(path);
        checks.push(run_check(cmd, "python-lint")?);
    } else if let Some(flake8) = find_in_path("flake8") {
        let mut cmd = Command::new(flake8);
        cmd.arg("--select=E,F").arg(path);
        checks.push(run_check(cmd, "python-lint")?);
    }
    Ok(checks)
}

fn verify_node(path: &Path) -> Result<Vec<Check>> {
    if find_in_path("node").is_none() {
        return Ok(vec![exists_check("js-exists", path)]);
    }
    let mut cmd = Command::new("node");
    cmd.arg("--check").arg(path);
    Ok(vec![run_check(cmd, "js-syntax")?])
}

fn verify_json(path: &Path) -> Result<Vec<Check>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let check = match serde_json::from_str::<serde_json::Value>(&contents) {
        Ok(_) => Check {
            name: "json-valid".to_string(),
            passed: true,
            detail: "OK".to_string(),
        },
        Err(e) => Check {
            name: "json-valid".to_string(),
            passed: false,
            detail: e.to_string(),
        },
    };
    Ok(vec![check])
}

fn run_check(cmd: Command, name: &str) -> Result<Check> {
    let output = run_with_timeout(cmd, CHECK_TIMEOUT, CHECK_OUTPUT_LIMIT, &CancelToken::new())
        .with_context(|| format!("run check '{name}'"))?;
    Ok(check_from_output(name, &output))
}

fn check_from_output(name: &str, output: &CommandOutput) -> Check {
    if output.success() {
        Check {
            name: name.to_string(),
            passed: true,
            detail: "OK".to_string(),
        }
    } else {
        Check {
            name: name.to_string(),
            passed: false,
            detail: output.error_tail(3_000),
        }
    }
}

/// Resolve an executable against `PATH`.
pub fn find_in_path(exe: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe))
        .find(|candidate| candidate.is_file())
}

// ── Structured diagnostics ─────────────────────────────────────────

static PY_TRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "(.+?)", line (\d+)"#).expect("py trace regex"));

static COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([^\s:]+\.\w+):(\d+):(?:\d+:?)?\s*(.+)$").expect("colon regex")
});

/// Extract file/line diagnostics from recognized error formats.
///
/// Recognizes the Python traceback shape (`File "p", line N`) and the
/// `path:line:col: message` shape used by node, ruff, and flake8. Output
/// with neither shape yields one uncategorized entry so the analyzer
/// always has something to work from.
pub fn extract_diagnostics(check_name: &str, output: &str) -> Vec<Diagnostic> {
    let category = category_for_check(check_name);
    let mut diagnostics = Vec::new();

    for caps in PY_TRACE_RE.captures_iter(output) {
        diagnostics.push(Diagnostic {
            path: caps[1].to_string(),
            line: caps[2].parse().ok(),
            category,
            message: crate::core::types::truncate(output.trim(), 300),
        });
    }
    if diagnostics.is_empty() {
        for caps in COLON_RE.captures_iter(output) {
            diagnostics.push(Diagnostic {
                path: caps[1].to_string(),
                line: caps[2].parse().ok(),
                category,
                message: caps[3].trim().to_string(),
            });
        }
    }
    if diagnostics.is_empty() && !output.trim().is_empty() {
        diagnostics.push(Diagnostic {
            path: String::new(),
            line: None,
            category,
            message: crate::core::types::truncate(output.trim(), 300),
        });
    }
    diagnostics
}

fn category_for_check(name: &str) -> ErrorCategory {
    if name.contains("syntax") {
        ErrorCategory::Syntax
    } else if name.contains("lint") {
        ErrorCategory::Lint
    } else if name.contains("import") {
        ErrorCategory::Import
    } else if name.contains("type") {
        ErrorCategory::Type
    } else {
        ErrorCategory::Runtime
    }
}

// ── Run-command detection ──────────────────────────────────────────

/// A detected project run command, as a shell string plus working dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub command: String,
    pub cwd: PathBuf,
}

const PY_ENTRIES: [&str; 2] = ["main.py", "app.py"];
const NODE_ENTRIES: [&str; 4] = ["app.js", "index.js", "server.js", "main.js"];
const NODE_SUBDIRS: [&str; 5] = ["server", "backend", "src", "api", "app"];
const HTML_DIRS: [&str; 4] = [".", "public", "frontend", "dist"];

/// Detect how to run the project in `root`, or `None`.
///
/// Order: python entry file; `package.json` scripts (`start`/`dev`), then
/// its `main` field; known node entry files in the root and common
/// subdirectories; an HTML entry served statically; any `.py` file.
pub fn detect_run_command(root: &Path) -> Option<RunCommand> {
    for entry in PY_ENTRIES {
        if root.join(entry).is_file() {
            return Some(RunCommand {
                command: format!("python3 {entry}"),
                cwd: root.to_path_buf(),
            });
        }
    }

    let search_dirs: Vec<PathBuf> = std::iter::once(root.to_path_buf())
        .chain(NODE_SUBDIRS.iter().map(|d| root.join(d)))
        .collect();

    for dir in &search_dirs {
        let pkg_path = dir.join("package.json");
        if !pkg_path.is_file() {
            continue;
        }
        match read_package_json(&pkg_path) {
            Ok(pkg) => {
                if pkg.scripts.contains_key("start") {
                    return Some(RunCommand {
                        command: "npm start".to_string(),
                        cwd: dir.clone(),
                    });
                }
                if pkg.scripts.contains_key("dev") {
                    return Some(RunCommand {
                        command: "npm run dev".to_string(),
                        cwd: dir.clone(),
                    });
                }
                if let Some(main) = &pkg.main {
                    if dir.join(main).is_file() {
                        return Some(RunCommand {
                            command: format!("node {main}"),
                            cwd: dir.clone(),
                        });
                    }
                }
            }
            Err(err) => {
                warn!(path = %pkg_path.display(), %err, "malformed package.json, skipping");
            }
        }
    }

    for dir in &search_dirs {
        for entry in NODE_ENTRIES {
            if dir.join(entry).is_file() {
                return Some(RunCommand {
                    command: format!("node {entry}"),
                    cwd: dir.clone(),
                });
            }
        }
    }

    for dir in HTML_DIRS {
        let dir = if dir == "." {
            root.to_path_buf()
        } else {
            root.join(dir)
        };
        if dir.join("index.html").is_file() {
            return Some(RunCommand {
                command: "python3 -m http.server 8000".to_string(),
                cwd: dir,
            });
        }
    }

    let mut py_files: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(OsStr::to_str) == Some("py"))
        .collect();
    py_files.sort();
    py_files.first().map(|p| RunCommand {
        command: format!(
            "python3 {}",
            p.file_name().and_then(OsStr::to_str).unwrap_or_default()
        ),
        cwd: root.to_path_buf(),
    })
}

#[derive(Debug, serde::Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    main: Option<String>,
}

fn read_package_json(path: &Path) -> Result<PackageJson> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn json_check_flags_invalid_documents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let good = temp.path().join("good.json");
        let bad = temp.path().join("bad.json");
        fs::write(&good, "{\"a\": 1}\n").expect("write");
        fs::write(&bad, "{broken\n").expect("write");

        let verifier = StaticVerifier::new();
        assert!(verifier.verify(&good).expect("verify").passed);
        let result = verifier.verify(&bad).expect("verify");
        assert!(!result.passed);
        assert_eq!(result.checks[0].name, "json-valid");
    }

    #[test]
    fn unknown_extensions_pass_by_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("notes.md");
        fs::write(&path, "# notes\n").expect("write");
        let result = StaticVerifier::new().verify(&path).expect("verify");
        assert!(result.passed);
    }

    #[test]
    fn python_traceback_diagnostics_extract_file_and_line() {
        let output = "Traceback (most recent call last):\n  File \"app.py\", line 7\n    def f(:\nSyntaxError: invalid syntax";
        let diags = extract_diagnostics("python-syntax", output);
        assert_eq!(diags[0].path, "app.py");
        assert_eq!(diags[0].line, Some(7));
        assert_eq!(diags[0].category, ErrorCategory::Syntax);
    }

    #[test]
    fn colon_style_diagnostics_extract() {
        let output = "src/app.js:12:5: Unexpected token\nsrc/app.js:20:1: missing semicolon";
        let diags = extract_diagnostics("python-lint", output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].path, "src/app.js");
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].category, ErrorCategory::Lint);
        assert_eq!(diags[1].message, "missing semicolon");
    }

    #[test]
    fn unrecognized_output_yields_one_generic_entry() {
        let diags = extract_diagnostics("js-syntax", "something exploded");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].path.is_empty());
        assert_eq!(diags[0].category, ErrorCategory::Syntax);
    }

    #[test]
    fn detects_python_entry_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("main.py"), "print()\n").expect("write");
        fs::write(temp.path().join("package.json"), "{}").expect("write");
        let cmd = detect_run_command(temp.path()).expect("detect");
        assert_eq!(cmd.command, "python3 main.py");
    }

    #[test]
    fn detects_npm_start_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("package.json"),
            "{\"scripts\": {\"start\": \"node app.js\"}}",
        )
        .expect("write");
        let cmd = detect_run_command(temp.path()).expect("detect");
        assert_eq!(cmd.command, "npm start");
    }

    #[test]
    fn falls_back_to_package_main_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("package.json"), "{\"main\": \"srv.js\"}").expect("write");
        fs::write(temp.path().join("srv.js"), "// server\n").expect("write");
        let cmd = detect_run_command(temp.path()).expect("detect");
        assert_eq!(cmd.command, "node srv.js");
    }

    #[test]
    fn malformed_package_json_is_skipped_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("package.json"), "{nope").expect("write");
        fs::write(temp.path().join("server.js"), "// entry\n").expect("write");
        let cmd = detect_run_command(temp.path()).expect("detect");
        assert_eq!(cmd.command, "node server.js");
    }

    #[test]
    fn node_entries_found_in_common_subdirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("backend")).expect("mkdir");
        fs::write(temp.path().join("backend/index.js"), "// entry\n").expect("write");
        let cmd = detect_run_command(temp.path()).expect("detect");
        assert_eq!(cmd.command, "node index.js");
        assert!(cmd.cwd.ends_with("backend"));
    }

    #[test]
    fn empty_workspace_detects_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(detect_run_command(temp.path()).is_none());
    }
}
