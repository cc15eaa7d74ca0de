//! Pull a runnable script out of a completion
//!
//! Completion services wrap code in markdown fences and sometimes prefix a
//! `# filename: ...` hint. The sandbox only wants the script body.

use crate::feedback::outcome::Failure;
use regex::Regex;
use std::sync::LazyLock;

/// Fenced block with an optional language tag: ```python\n...\n```
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+\-]*)[^\n]*\n(.*?)```")
        .expect("FENCED_BLOCK regex should compile")
});

static FILENAME_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#\s*filename:\s*\S+\s*$").expect("FILENAME_HINT regex should compile")
});

/// Extract the script body from raw completion text.
///
/// Picks the first fenced block tagged with `language` (or one of its
/// aliases), falling back to the first fenced block of any tag, then to the
/// whole text. Empty results are a `generation-error`.
pub fn extract_code(raw: &str, language: &str) -> Result<String, Failure> {
    let blocks: Vec<(String, String)> = FENCED_BLOCK
        .captures_iter(raw)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].to_string()))
        .collect();

    let body = if blocks.is_empty() {
        raw.to_string()
    } else {
        let aliases = language_aliases(language);
        blocks
            .iter()
            .find(|(tag, _)| aliases.contains(&tag.as_str()))
            .or_else(|| blocks.first())
            .map(|(_, body)| body.clone())
            .unwrap_or_default()
    };

    let body = strip_filename_hint(&body);
    if body.trim().is_empty() {
        return Err(Failure::generation(
            "the completion contained no code (empty artifact)",
        ));
    }
    Ok(body)
}

fn language_aliases(language: &str) -> Vec<&str> {
    match language {
        "python" | "python3" | "py" => vec!["python", "python3", "py"],
        "sh" | "bash" | "shell" => vec!["sh", "bash", "shell"],
        other => vec![other],
    }
}

fn strip_filename_hint(body: &str) -> String {
    let mut lines = body.lines();
    match lines.next() {
        Some(first) if FILENAME_HINT.is_match(first) => {
            let rest: Vec<&str> = lines.collect();
            rest.join("\n") + "\n"
        }
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::outcome::FailureCategory;

    #[test]
    fn test_plain_text_is_taken_whole() {
        let code = extract_code("print('hi')\n", "python").unwrap();
        assert_eq!(code, "print('hi')\n");
    }

    #[test]
    fn test_fenced_python_block() {
        let raw = "Here is the plot:\n```python\nimport numpy as np\nprint(np.pi)\n```\nTERMINATE";
        let code = extract_code(raw, "python").unwrap();
        assert_eq!(code, "import numpy as np\nprint(np.pi)\n");
    }

    #[test]
    fn test_prefers_matching_language() {
        let raw = "```text\npip install bigfile\n```\n```python\nimport bigfile\n```";
        let code = extract_code(raw, "python").unwrap();
        assert_eq!(code, "import bigfile\n");
    }

    #[test]
    fn test_falls_back_to_first_block() {
        let raw = "```\necho hi\n```";
        let code = extract_code(raw, "python").unwrap();
        assert_eq!(code, "echo hi\n");
    }

    #[test]
    fn test_filename_hint_removed() {
        let raw = "```python\n# filename: plot_pspec.py\nprint(1)\n```";
        let code = extract_code(raw, "python").unwrap();
        assert_eq!(code, "print(1)\n");
    }

    #[test]
    fn test_empty_completion_is_generation_error() {
        let err = extract_code("   \n", "python").unwrap_err();
        assert_eq!(err.category, FailureCategory::GenerationError);

        let err = extract_code("```python\n```", "python").unwrap_err();
        assert_eq!(err.category, FailureCategory::GenerationError);
    }
}
