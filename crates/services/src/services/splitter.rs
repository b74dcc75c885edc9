//! Chunking interface and the default line-window splitter.
//!
//! The AST-based splitter with per-language tokenizers is an external
//! collaborator; this trait is its seam. The line-window implementation is
//! the fallback used when no AST splitter is wired in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
}

pub trait CodeSplitter: Send + Sync {
    fn split(&self, relative_path: &str, content: &str) -> Vec<Chunk>;
}

/// Extensions indexed when the caller does not provide an allow-list.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "rb", "php", "swift", "scala", "sh", "sql", "md", "toml", "yaml", "yml", "json",
];

pub fn language_for_extension(extension: &str) -> &'static str {
    match extension {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" => "shell",
        "sql" => "sql",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        _ => "text",
    }
}

/// Fixed-size line windows with overlap. Line numbers are 1-based and
/// inclusive, matching what editors display.
pub struct LineWindowSplitter {
    window: usize,
    overlap: usize,
}

impl Default for LineWindowSplitter {
    fn default() -> Self {
        Self {
            window: 100,
            overlap: 20,
        }
    }
}

impl LineWindowSplitter {
    pub fn new(window: usize, overlap: usize) -> Self {
        assert!(overlap < window, "overlap must leave forward progress");
        Self { window, overlap }
    }
}

impl CodeSplitter for LineWindowSplitter {
    fn split(&self, relative_path: &str, content: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }
        let extension = relative_path.rsplit('.').next().unwrap_or("");
        let language = language_for_extension(extension).to_string();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < lines.len() {
            let end = (start + self.window).min(lines.len());
            let body = lines[start..end].join("\n");
            if !body.trim().is_empty() {
                chunks.push(Chunk {
                    relative_path: relative_path.to_string(),
                    start_line: start + 1,
                    end_line: end,
                    language: language.clone(),
                    content: body,
                });
            }
            if end == lines.len() {
                break;
            }
            start = end - self.overlap;
        }
        chunks
    }
}
