use std::path::{Component, Path, PathBuf};

/// Truncate for display, appending an ellipsis when shortened (Unicode-safe).
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Borrow at most `max_chars` characters of `s` (Unicode-safe, no ellipsis).
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Join a relative source path onto a project root.
///
/// Absolute paths and parent traversal are rejected so a crafted stack frame
/// can never point the resolver outside the project.
pub fn resolve_project_path(root: &Path, candidate: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(candidate);
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }
    Ok(root.join(candidate))
}

/// Last path segment of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Remove a leading/trailing Markdown code fence (```lang ... ```).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = match trimmed.strip_prefix("```") {
        Some(rest) => match rest.find('\n') {
            // Drop the language tag line
            Some(newline) if !rest[..newline].contains(' ') => &rest[newline + 1..],
            _ => rest,
        },
        None => trimmed,
    };
    let without_close = without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open);
    without_close.trim_matches('\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_truncate_str_counts_chars_not_bytes() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("abc", 10), "abc");
        assert_eq!(truncate_str("abc", 0), "");
    }

    #[test]
    fn test_resolve_project_path_rejects_escape() {
        let root = Path::new("/app");
        assert!(resolve_project_path(root, "../etc/passwd").is_err());
        assert!(resolve_project_path(root, "/etc/passwd").is_err());
        assert!(resolve_project_path(root, "").is_err());
        assert_eq!(
            resolve_project_path(root, "src/App.jsx").unwrap(),
            PathBuf::from("/app/src/App.jsx")
        );
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("src/components/Button.jsx"), "Button.jsx");
        assert_eq!(base_name("main.js"), "main.js");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```javascript\nconst a = 1;\n```"), "const a = 1;");
        assert_eq!(strip_code_fences("```\nx\n```"), "x");
        assert_eq!(strip_code_fences("plain"), "plain");
    }
}
