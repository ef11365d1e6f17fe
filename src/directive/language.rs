//! File classification and comment markers.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Reserved file holding an interactive shell transcript
pub const SHELL_TRANSCRIPT_FILE: &str = ".cui.log";

/// Language of a materialized file, derived from its path alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageTag {
    Python,
    Bash,
    /// Shell session log; reported as `bash`, scanned past `$` prompts
    #[serde(rename = "bash")]
    ShellTranscript,
    JavaScript,
    Go,
    C,
    Html,
    Markdown,
    Css,
    Json,
    PlainText,
}

impl LanguageTag {
    /// Classify by reserved file name, then by suffix. Unknown suffixes are plain text.
    pub fn classify(relative_path: &str) -> Self {
        let file_name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or(relative_path);
        if file_name == SHELL_TRANSCRIPT_FILE {
            return LanguageTag::ShellTranscript;
        }

        let extension = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("py") => LanguageTag::Python,
            Some("sh") | Some("bash") => LanguageTag::Bash,
            Some("js") | Some("mjs") => LanguageTag::JavaScript,
            Some("go") => LanguageTag::Go,
            Some("c") | Some("h") => LanguageTag::C,
            Some("html") | Some("htm") => LanguageTag::Html,
            Some("md") => LanguageTag::Markdown,
            Some("css") => LanguageTag::Css,
            Some("json") => LanguageTag::Json,
            _ => LanguageTag::PlainText,
        }
    }

    /// Line comment opener, or `None` when directives can't be written in this language.
    pub fn comment_marker(self) -> Option<&'static str> {
        match self {
            LanguageTag::Python | LanguageTag::Bash | LanguageTag::ShellTranscript => Some("#"),
            LanguageTag::PlainText | LanguageTag::JavaScript | LanguageTag::Go | LanguageTag::C => {
                Some("//")
            }
            LanguageTag::Html => Some("<!--"),
            LanguageTag::Markdown | LanguageTag::Css | LanguageTag::Json => None,
        }
    }

    /// Characters stripped from the start of a line before matching the marker.
    pub(crate) fn line_prefix(self) -> &'static [char] {
        match self {
            LanguageTag::ShellTranscript => &[' ', '\t', '$'],
            _ => &[' ', '\t'],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LanguageTag::Python => "python",
            LanguageTag::Bash | LanguageTag::ShellTranscript => "bash",
            LanguageTag::JavaScript => "javascript",
            LanguageTag::Go => "go",
            LanguageTag::C => "c",
            LanguageTag::Html => "html",
            LanguageTag::Markdown => "markdown",
            LanguageTag::Css => "css",
            LanguageTag::Json => "json",
            LanguageTag::PlainText => "plaintext",
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
