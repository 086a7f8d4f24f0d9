//! File operation tools: read, edit, write files.
//!
//! ## Workspace-First Design
//!
//! These tools work relative to the workspace by default:
//! - `src/lib.rs` → reads `{workspace}/src/lib.rs`
//! - `/etc/hosts` → absolute path, subject to the [`PathPolicy`](super::PathPolicy)

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{optional_bool, optional_u64, required_str, Tool, ToolContext, ToolError, ToolOutput};

/// Lines longer than this many characters are cut when read.
pub const MAX_LINE_CHARS: usize = 2000;

/// Read the contents of a file with line numbers.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Returns file contents with line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read (relative to workspace or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (0-indexed). Optional."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read. Optional."
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "file_path")?;
        let offset = optional_u64(&args, "offset")?.unwrap_or(0) as usize;
        let limit = optional_u64(&args, "limit")?.map(|n| n as usize);

        let resolution = ctx.resolve(path)?;
        let metadata = tokio::fs::metadata(&resolution.resolved)
            .await
            .map_err(|_| ToolError::new(format!("File not found: {}", path)))?;
        if !metadata.is_file() {
            return Err(ToolError::new(format!("Not a file: {}", path)));
        }

        let bytes = tokio::fs::read(&resolution.resolved)
            .await
            .map_err(|e| ToolError::new(format!("Error reading {}: {}", path, e)))?;
        let content = String::from_utf8_lossy(&bytes);

        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(i, line)| {
                if line.chars().count() > MAX_LINE_CHARS {
                    let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
                    format!("{:>6}\t{}...[truncated]", i + 1, cut)
                } else {
                    format!("{:>6}\t{}", i + 1, line)
                }
            })
            .collect();

        Ok(ToolOutput::Text(numbered.join("\n")))
    }
}

/// Replace exact string matches in a file.
pub struct EditFile;

#[async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing exact string matches. The old_string must match exactly."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "If true, replace all occurrences. If false, require unique match."
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "file_path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let replace_all = optional_bool(&args, "replace_all");

        if old_string.is_empty() {
            return Err(ToolError::new("old_string must not be empty"));
        }

        let resolution = ctx.resolve(path)?;
        if !resolution.resolved.is_file() {
            return Err(ToolError::new(format!("File not found: {}", path)));
        }

        let content = tokio::fs::read_to_string(&resolution.resolved)
            .await
            .map_err(|e| ToolError::new(format!("Error editing {}: {}", path, e)))?;

        let count = content.matches(old_string).count();
        if count == 0 {
            let preview: String = old_string.chars().take(50).collect();
            return Err(ToolError::new(format!(
                "String not found in {}: {}...",
                path, preview
            )));
        }
        if count > 1 && !replace_all {
            return Err(ToolError::new(format!(
                "String appears {} times in {}. Provide more context or use replace_all=true",
                count, path
            )));
        }

        let updated = content.replace(old_string, new_string);
        tokio::fs::write(&resolution.resolved, updated)
            .await
            .map_err(|e| ToolError::new(format!("Error editing {}: {}", path, e)))?;

        let mut out = Map::new();
        out.insert("file_path".into(), json!(path));
        out.insert("replacements".into(), json!(count));
        out.insert(
            "message".into(),
            json!(format!("Replaced {} occurrence(s) in {}", count, path)),
        );
        Ok(ToolOutput::Object(out))
    }
}

/// Write content to a file (create or overwrite).
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file (creates or overwrites). Creates parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "file_path")?;
        let content = required_str(&args, "content")?;

        let resolution = ctx.resolve(path)?;

        // Create parent directories if needed
        if let Some(parent) = resolution.resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::new(format!("Error writing {}: {}", path, e)))?;
        }

        tokio::fs::write(&resolution.resolved, content)
            .await
            .map_err(|e| ToolError::new(format!("Error writing {}: {}", path, e)))?;

        Ok(ToolOutput::Text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(dir.path())
    }

    fn text(out: ToolOutput) -> String {
        match out {
            ToolOutput::Text(t) => t,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_numbers_lines_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let out = ReadFile
            .execute(json!({"file_path": "a.txt"}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(text(out), "     1\tone\n     2\ttwo\n     3\tthree\n     4\tfour");

        let out = ReadFile
            .execute(json!({"file_path": "a.txt", "offset": 1, "limit": 2}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(text(out), "     2\ttwo\n     3\tthree");
    }

    #[tokio::test]
    async fn test_read_truncates_long_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("long.txt"), "x".repeat(2500)).unwrap();
        let out = text(
            ReadFile
                .execute(json!({"file_path": "long.txt"}), &ctx(&dir))
                .await
                .unwrap(),
        );
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.matches('x').count(), MAX_LINE_CHARS);
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let err = ReadFile
            .execute(json!({"file_path": "nope.txt"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.message, "File not found: nope.txt");

        let err = ReadFile
            .execute(json!({"file_path": "sub"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Not a file: sub");
    }

    #[tokio::test]
    async fn test_edit_requires_unique_match_unless_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "let a = foo();\nlet b = foo();\n").unwrap();

        let err = EditFile
            .execute(
                json!({"file_path": "lib.rs", "old_string": "foo", "new_string": "bar"}),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("appears 2 times"));
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "let a = foo();\nlet b = foo();\n"
        );

        let out = EditFile
            .execute(
                json!({
                    "file_path": "lib.rs",
                    "old_string": "foo",
                    "new_string": "bar",
                    "replace_all": true
                }),
                &ctx(&dir),
            )
            .await
            .unwrap();
        match out {
            ToolOutput::Object(map) => assert_eq!(map["replacements"], 2),
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "let a = bar();\nlet b = bar();\n"
        );
    }

    #[tokio::test]
    async fn test_edit_absent_or_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let err = EditFile
            .execute(
                json!({"file_path": "a.txt", "old_string": "bye", "new_string": "x"}),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.message.starts_with("String not found in a.txt"));

        let err = EditFile
            .execute(
                json!({"file_path": "a.txt", "old_string": "", "new_string": "x"}),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("must not be empty"));
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFile
            .execute(
                json!({"file_path": "out/deep/report.md", "content": "# Report\n"}),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(text(out), "Wrote 9 bytes to out/deep/report.md");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/deep/report.md")).unwrap(),
            "# Report\n"
        );
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFile
            .execute(json!({"file_path": "a.txt"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Missing 'content' argument");
    }
}
