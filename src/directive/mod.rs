//! Directive Extractor
//!
//! Authors annotate files with comment lines of the form `<marker>@"key": value`,
//! e.g. `#@"content": "explain the loop"` in Python. Each such line is wrapped
//! in braces and decoded as a JSON object; decoded patches fold left into one
//! [`Directive`], later fields replacing earlier ones. Lines that don't decode
//! are ignored.

pub mod language;

pub use language::{LanguageTag, SHELL_TRANSCRIPT_FILE};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("No directive comment syntax for language {0}")]
    UnsupportedLanguage(LanguageTag),
}

/// Annotation attached to a file at one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Directive {
    /// Caption shown alongside the file
    pub content: String,
    /// Keys other than `content`, kept as written
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One decoded directive line
#[derive(Debug, Default, Deserialize)]
pub struct DirectivePatch {
    content: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Directive {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.extra.is_empty()
    }

    fn apply(&mut self, patch: DirectivePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        self.extra.extend(patch.extra);
    }
}

/// Decode the body of a directive line (the text after `<marker>@`).
pub fn decode_line(body: &str) -> Result<DirectivePatch, serde_json::Error> {
    serde_json::from_str(&format!("{{{}}}", body))
}

/// Fold every directive line of `content` into one directive.
pub fn extract(content: &str, language: LanguageTag) -> Result<Directive, DirectiveError> {
    let marker = language
        .comment_marker()
        .ok_or(DirectiveError::UnsupportedLanguage(language))?;
    let prefix = language.line_prefix();

    let mut directive = Directive::default();
    for (number, line) in content.split('\n').enumerate() {
        let trimmed = line.trim_start_matches(prefix);
        let Some(body) = trimmed
            .strip_prefix(marker)
            .and_then(|rest| rest.strip_prefix('@'))
        else {
            continue;
        };
        match decode_line(body) {
            Ok(patch) => directive.apply(patch),
            Err(e) => trace!(line = number + 1, error = %e, "Skipping undecodable directive"),
        }
    }
    Ok(directive)
}

/// Materialized file with its classification and directive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    #[serde(skip)]
    pub relative_path: String,
    pub content: String,
    pub language_tag: LanguageTag,
    pub directive: Directive,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive_error: Option<String>,
}

/// Classify `relative_path` and extract its directive. Never fails: an
/// unsupported language yields an empty directive plus `directive_error`.
pub fn extract_file(relative_path: &str, content: String) -> FileRecord {
    let language_tag = LanguageTag::classify(relative_path);
    let (directive, directive_error) = match extract(&content, language_tag) {
        Ok(directive) => (directive, None),
        Err(e) => (Directive::default(), Some(e.to_string())),
    };
    FileRecord {
        relative_path: relative_path.to_string(),
        content,
        language_tag,
        directive,
        directive_error,
    }
}
