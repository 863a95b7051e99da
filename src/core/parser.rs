//! Multi-strategy parser for free-form model output.
//!
//! Local models do not reliably follow one file-block format, so extraction
//! tries four strategies in order and uses the first that yields at least
//! one file write:
//!
//! 1. strict markers: `===FILE: path=== … ===END===`
//! 2. marker followed by a fenced code block
//! 3. markdown heading or bold-only path line followed by a fenced block
//! 4. marker with raw content until the next marker or end of text
//!
//! Shell-command blocks (`===RUN: …===`, `===BACKGROUND: …===`) are parsed
//! independently of file blocks. Dangerous commands are filtered here,
//! before any dispatch path can see them.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A file write extracted from model output. Content carries no trailing
/// newline; the workspace writer appends exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Runs synchronously; a non-zero exit stops later foreground commands.
    Foreground,
    /// Spawned detached, for servers and watchers.
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub kind: CommandKind,
    pub command: String,
}

/// Everything extracted from one model response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedResponse {
    pub files: Vec<FileWrite>,
    pub commands: Vec<ShellCommand>,
    /// Commands dropped by the safety filter, for event reporting.
    pub rejected_commands: Vec<String>,
    /// Original text with every recognized block removed.
    pub display_text: String,
}

static STRICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)===FILE:[ \t]*(.+?)[ \t]*===[ \t]*\n(.*?)===END===").expect("strict regex")
});

static MARKER_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)===FILE:[ \t]*(.+?)[ \t]*===[ \t]*\n```\w*[ \t]*\n(.*?)\n```")
        .expect("marker+fence regex")
});

static HEADING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^(?:#{1,4}[ \t]+(?:(?:FILE|File|Updated|Modified)[: \t]+)?["'`]?([A-Za-z0-9_\-/. ]+\.[A-Za-z0-9]+)["'`]?|\*\*([A-Za-z0-9_\-/. ]+\.[A-Za-z0-9]+)\*\*)[ \t]*\n+```\w*[ \t]*\n(?s:(.*?))\n```"#,
    )
    .expect("heading regex")
});

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"===FILE:[ \t]*(.+?)[ \t]*===[ \t]*\n").expect("marker regex"));

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)===(RUN|BACKGROUND):[ \t]*(.+?)[ \t]*===").expect("command regex")
});

static END_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^===END===[ \t]*$").expect("end-line regex"));

/// Fence tags whose wrapping is stripped from extracted file bodies.
const STRIPPABLE_TAGS: [&str; 6] = ["", "json", "javascript", "python", "typescript", "bash"];

/// Substrings that mark a command as destructive. Matched case-insensitively
/// against the whole command; a hit drops the command in every mode.
const DANGEROUS_PATTERNS: [&str; 5] = ["rm -rf /", "sudo rm", "mkfs", "dd if=", ":(){"];

/// Parse one model response into file writes, shell commands, and the
/// remaining display text.
pub fn parse(text: &str) -> ParsedResponse {
    let files = extract_files(text);
    let (commands, rejected_commands) = extract_commands(text);
    let display_text = strip_blocks(text);
    ParsedResponse {
        files,
        commands,
        rejected_commands,
        display_text,
    }
}

/// Canonical file-block emission. `parse` on the result returns the same
/// (path, content) pair.
pub fn emit_file_block(path: &str, content: &str) -> String {
    format!("===FILE: {path}===\n{content}\n===END===\n")
}

/// True when a command matches any destructive pattern.
pub fn is_dangerous(command: &str) -> bool {
    let lower = command.to_lowercase();
    DANGEROUS_PATTERNS.iter().any(|p| lower.contains(p))
}

fn extract_files(text: &str) -> Vec<FileWrite> {
    let strategies: [fn(&str) -> Vec<FileWrite>; 4] = [
        extract_strict,
        extract_marker_fence,
        extract_heading_fence,
        extract_marker_raw,
    ];
    for strategy in strategies {
        let found = strategy(text);
        if !found.is_empty() {
            return dedupe(found);
        }
    }
    Vec::new()
}

fn extract_strict(text: &str) -> Vec<FileWrite> {
    STRICT_RE
        .captures_iter(text)
        .filter_map(|caps| make_write(&caps[1], &caps[2]))
        .collect()
}

fn extract_marker_fence(text: &str) -> Vec<FileWrite> {
    MARKER_FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| make_write(&caps[1], &caps[2]))
        .collect()
}

fn extract_heading_fence(text: &str) -> Vec<FileWrite> {
    HEADING_FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let path = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            make_write(path, &caps[3])
        })
        .collect()
}

fn extract_marker_raw(text: &str) -> Vec<FileWrite> {
    let markers: Vec<_> = MARKER_RE.captures_iter(text).collect();
    let mut writes = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let whole = caps.get(0).expect("match 0");
        let start = whole.end();
        let next_marker = markers
            .get(i + 1)
            .map(|next| next.get(0).expect("match 0").start())
            .unwrap_or(text.len());
        let next_command = COMMAND_RE
            .find_at(text, start)
            .map(|m| m.start())
            .unwrap_or(text.len());
        let end = next_marker.min(next_command);
        if let Some(write) = make_write(&caps[1], &text[start..end]) {
            writes.push(write);
        }
    }
    writes
}

/// Normalize one extracted (path, body) pair, or reject it.
fn make_write(path: &str, body: &str) -> Option<FileWrite> {
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() || path.len() > 200 || path.contains('\n') || path.contains("..") {
        return None;
    }
    let body = END_LINE_RE.replace_all(body, "");
    let content = strip_body_fences(body.trim());
    if content.is_empty() {
        return None;
    }
    Some(FileWrite {
        path: path.to_string(),
        content,
    })
}

/// Strip a wrapping code fence when the body opens with one whose language
/// tag is strippable. Bodies without fences pass through unchanged.
fn strip_body_fences(body: &str) -> String {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let (tag, after_tag) = match rest.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest),
        None => return trimmed.to_string(),
    };
    if !STRIPPABLE_TAGS.contains(&tag) {
        return trimmed.to_string();
    }
    let inner = after_tag
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(after_tag);
    inner.trim().to_string()
}

fn dedupe(writes: Vec<FileWrite>) -> Vec<FileWrite> {
    let mut seen = std::collections::HashSet::new();
    writes
        .into_iter()
        .filter(|w| seen.insert(w.path.clone()))
        .collect()
}

fn extract_commands(text: &str) -> (Vec<ShellCommand>, Vec<String>) {
    let mut commands = Vec::new();
    let mut rejected = Vec::new();
    for caps in COMMAND_RE.captures_iter(text) {
        let command = caps[2].trim().to_string();
        if command.is_empty() {
            continue;
        }
        if is_dangerous(&command) {
            rejected.push(command);
            continue;
        }
        let kind = if caps[1].eq_ignore_ascii_case("background") {
            CommandKind::Background
        } else {
            CommandKind::Foreground
        };
        commands.push(ShellCommand { kind, command });
    }
    (commands, rejected)
}

/// Remove every recognized block from the response, leaving prose.
///
/// All block shapes are stripped regardless of which strategy extracted the
/// files, so raw code never spills into display output when the extractor
/// matched a different variant than the stripper.
fn strip_blocks(text: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank collapse regex"));

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for re in [&*STRICT_RE, &*MARKER_FENCE_RE, &*HEADING_FENCE_RE] {
        for m in re.find_iter(text) {
            ranges.push((m.start(), m.end()));
        }
    }
    // Marker-raw spans run to the next marker or command block; computed by
    // hand because the regex crate has no lookahead.
    let markers: Vec<_> = MARKER_RE.find_iter(text).collect();
    for (i, m) in markers.iter().enumerate() {
        let next_marker = markers
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(text.len());
        let next_command = COMMAND_RE
            .find_at(text, m.end())
            .map(|c| c.start())
            .unwrap_or(text.len());
        ranges.push((m.start(), next_marker.min(next_command)));
    }
    for m in COMMAND_RE.find_iter(text) {
        ranges.push((m.start(), m.end()));
    }

    ranges.sort_unstable();
    let mut out = String::new();
    let mut cursor = 0usize;
    for (start, end) in ranges {
        if start > cursor {
            out.push_str(&text[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }
    BLANKS_RE.replace_all(&out, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_markers_extract_path_and_content() {
        let parsed = parse("===FILE: app.py===\nprint(\"hi\")\n===END===\n");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "app.py");
        assert_eq!(parsed.files[0].content, "print(\"hi\")");
        assert!(parsed.commands.is_empty());
        assert!(parsed.display_text.is_empty());
    }

    #[test]
    fn parse_of_canonical_emission_is_identity() {
        let block = emit_file_block("src/util.js", "const x = 1;");
        let parsed = parse(&block);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "src/util.js");
        assert_eq!(parsed.files[0].content, "const x = 1;");
    }

    #[test]
    fn fences_inside_strict_block_are_stripped() {
        let parsed =
            parse("===FILE: package.json===\n```json\n{\"name\":\"x\"}\n```\n===END===\n");
        assert_eq!(parsed.files[0].content, "{\"name\":\"x\"}");
    }

    #[test]
    fn unknown_fence_tags_are_preserved() {
        let parsed = parse("===FILE: lib.rs===\n```rust\nfn main() {}\n```\n===END===\n");
        assert_eq!(parsed.files[0].content, "```rust\nfn main() {}\n```");
    }

    #[test]
    fn marker_with_fence_and_no_end_marker_extracts() {
        let parsed = parse("===FILE: main.py===\n```python\nx = 1\n```\n");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "main.py");
        assert_eq!(parsed.files[0].content, "x = 1");
    }

    #[test]
    fn heading_with_fence_extracts() {
        let parsed = parse("### src/index.js\n```javascript\nconsole.log(1)\n```\n");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "src/index.js");
        assert_eq!(parsed.files[0].content, "console.log(1)");
    }

    #[test]
    fn bold_path_with_fence_extracts() {
        let parsed = parse("**style.css**\n```\nbody {}\n```\n");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "style.css");
    }

    #[test]
    fn marker_without_end_falls_back_to_raw_capture() {
        let parsed = parse("===FILE: a.py===\nx = 1\n===FILE: b.py===\ny = 2\n");
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].content, "x = 1");
        assert_eq!(parsed.files[1].content, "y = 2");
    }

    #[test]
    fn raw_capture_stops_before_run_block() {
        let parsed = parse("===FILE: a.py===\nx = 1\n===RUN: python3 a.py===\n");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "x = 1");
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(parsed.commands[0].command, "python3 a.py");
    }

    #[test]
    fn all_formats_agree_on_extraction() {
        let content = "x = 1";
        let variants = [
            format!("===FILE: m.py===\n{content}\n===END===\n"),
            format!("===FILE: m.py===\n```python\n{content}\n```\n"),
            format!("### m.py\n```python\n{content}\n```\n"),
            format!("===FILE: m.py===\n{content}\n"),
        ];
        for text in &variants {
            let parsed = parse(text);
            assert_eq!(parsed.files.len(), 1, "variant failed: {text:?}");
            assert_eq!(parsed.files[0].path, "m.py");
            assert_eq!(parsed.files[0].content, content);
        }
    }

    #[test]
    fn duplicate_paths_keep_first_occurrence() {
        let parsed = parse(
            "===FILE: a.py===\nfirst\n===END===\n===FILE: a.py===\nsecond\n===END===\n",
        );
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "first");
    }

    #[test]
    fn traversal_paths_are_rejected() {
        let parsed = parse("===FILE: ../../etc/passwd===\nx\n===END===\n");
        assert!(parsed.files.is_empty());
    }

    #[test]
    fn commands_parse_in_order_with_kinds() {
        let parsed = parse(
            "===RUN: npm install===\n===BACKGROUND: npm run dev===\n===RUN: npm test===\n",
        );
        assert_eq!(parsed.commands.len(), 3);
        assert_eq!(parsed.commands[0].kind, CommandKind::Foreground);
        assert_eq!(parsed.commands[1].kind, CommandKind::Background);
        assert_eq!(parsed.commands[2].command, "npm test");
    }

    #[test]
    fn dangerous_commands_are_rejected_not_returned() {
        for cmd in [
            "rm -rf /",
            "sudo rm -r /etc",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            ":(){:|:&};:",
        ] {
            let parsed = parse(&format!("===RUN: {cmd}==="));
            assert!(parsed.commands.is_empty(), "dispatched: {cmd}");
            assert_eq!(parsed.rejected_commands.len(), 1, "not recorded: {cmd}");
        }
    }

    #[test]
    fn display_text_drops_blocks_keeps_prose() {
        let parsed = parse(
            "Here is the file.\n\n===FILE: a.py===\nx = 1\n===END===\n\n===RUN: python3 a.py===\n\nDone.",
        );
        assert!(parsed.display_text.contains("Here is the file."));
        assert!(parsed.display_text.contains("Done."));
        assert!(!parsed.display_text.contains("x = 1"));
        assert!(!parsed.display_text.contains("===RUN"));
    }

    #[test]
    fn stray_end_lines_are_scrubbed_from_content() {
        let parsed = parse("===FILE: a.py===\nx = 1\n===END===\n===END===\n");
        assert_eq!(parsed.files[0].content, "x = 1");
    }
}
