//! Code search tools: regex search over file contents, glob over file names.
//!
//! ## Workspace-First Design
//!
//! Searches the workspace by default:
//! - `grep("TODO")` → searches in `{workspace}/`
//! - `glob("src/**/*.rs")` → paths come back workspace-relative

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{optional_bool, optional_str, optional_u64, required_str, Tool, ToolContext, ToolError, ToolOutput};

/// At most this many files are scanned by one `grep` call.
pub const MAX_GREP_FILES: usize = 100;
/// At most this many matches are returned by one `grep` call.
pub const MAX_GREP_MATCHES: usize = 50;
/// At most this many paths are returned by one `glob` call.
pub const MAX_GLOB_RESULTS: usize = 100;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Search file contents with a regex.
pub struct GrepSearch;

#[async_trait]
impl Tool for GrepSearch {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern in files. Returns matches with file, line number, and content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search in"
                },
                "glob": {
                    "type": "string",
                    "description": "File pattern to match (e.g., '*.py')"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case-insensitive search"
                },
                "context_lines": {
                    "type": "integer",
                    "description": "Number of context lines to show before/after match"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path = optional_str(&args, "path").unwrap_or(".");
        let file_glob = optional_str(&args, "glob").unwrap_or("*");
        let case_insensitive = optional_bool(&args, "case_insensitive");
        let context_lines = optional_u64(&args, "context_lines")?
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
            .unwrap_or(0);

        // Both patterns are checked before anything touches the filesystem.
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ToolError::new(format!("Invalid regex pattern: {}", e)))?;
        let file_pattern = Pattern::new(&format!("**/{}", file_glob))
            .map_err(|e| ToolError::new(format!("Invalid glob pattern '{}': {}", file_glob, e)))?;

        let resolution = ctx.resolve(path)?;
        if !resolution.resolved.exists() {
            return Err(ToolError::new(format!("Path not found: {}", path)));
        }

        let root = resolution.resolved;
        let ctx = ctx.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let files = collect_files(&root, &file_pattern, MAX_GREP_FILES);
            search_files(&files, &regex, context_lines, &ctx)
        })
        .await
        .map_err(|e| ToolError::new(format!("Search task failed: {}", e)))?;

        Ok(ToolOutput::List(matches))
    }
}

/// Files under `root` whose root-relative path matches `pattern`, in path
/// order, hidden entries skipped. A file `root` is returned as-is.
fn collect_files(root: &Path, pattern: &Pattern, limit: usize) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| pattern.matches_path_with(rel, MATCH_OPTIONS))
                .unwrap_or(false)
        })
        .take(limit)
        .map(|e| e.into_path())
        .collect()
}

fn search_files(files: &[PathBuf], regex: &Regex, context_lines: usize, ctx: &ToolContext) -> Vec<Value> {
    let mut matches = Vec::new();

    for file in files {
        // Unreadable files are skipped.
        let Ok(bytes) = std::fs::read(file) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();

        for (i, line) in lines.iter().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            let before = &lines[i.saturating_sub(context_lines)..i];
            let after = &lines[i + 1..(i + 1).saturating_add(context_lines).min(lines.len())];
            matches.push(json!({
                "file": ctx.display_path(file),
                "line_number": i + 1,
                "line": line.trim_end(),
                "context_before": before,
                "context_after": after,
            }));
            if matches.len() >= MAX_GREP_MATCHES {
                return matches;
            }
        }
    }
    matches
}

/// Find files by glob pattern.
pub struct GlobFiles;

#[async_trait]
impl Tool for GlobFiles {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Returns list of file paths."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (e.g., '**/*.py', 'src/*.js')"
                },
                "path": {
                    "type": "string",
                    "description": "Base directory to search in"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path = optional_str(&args, "path").unwrap_or(".");

        let resolution = ctx.resolve(path)?;
        if !resolution.resolved.exists() {
            return Err(ToolError::new(format!("Path not found: {}", path)));
        }

        let base = Pattern::escape(&resolution.resolved.to_string_lossy());
        let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
        let ctx = ctx.clone();

        let paths = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ToolError> {
            let entries = glob::glob_with(&full, MATCH_OPTIONS)
                .map_err(|e| ToolError::new(format!("Error globbing {}: {}", full, e)))?;
            let mut paths: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|p| ctx.display_path(&p))
                .collect();
            paths.sort();
            paths.truncate(MAX_GLOB_RESULTS);
            Ok(paths)
        })
        .await
        .map_err(|e| ToolError::new(format!("Glob task failed: {}", e)))??;

        Ok(ToolOutput::List(paths.into_iter().map(Value::String).collect()))
    }
}
