//! Guards for user- and plan-supplied path fragments

use std::path::Path;

use tracing::warn;

/// Returns `component` unchanged if it is safe to join onto a directory,
/// otherwise an empty string.
pub fn sanitize_path_component(component: &str) -> String {
    if component.is_empty() {
        return String::new();
    }

    let rejected = component.contains("..")
        || component.contains('/')
        || component.contains('\\')
        || component.bytes().any(|b| b < 0x20 || b == 0x7f);

    if rejected {
        warn!(component = ?component, "Rejected unsafe path component");
        return String::new();
    }
    component.to_string()
}

/// True if `candidate` resolves to `base` or somewhere beneath it.
/// Both paths must exist, since they are canonicalised first.
pub fn is_within_directory(candidate: &Path, base: &Path) -> bool {
    let (Ok(candidate), Ok(base)) = (candidate.canonicalize(), base.canonicalize()) else {
        return false;
    };
    candidate.starts_with(&base)
}

/// `[A-Za-z0-9_-]+`
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_traversal_and_separators() {
        for bad in ["", "..", "../etc", "foo/bar", "foo\\bar", "tab\x1fname", "del\x7f"] {
            assert_eq!(sanitize_path_component(bad), "", "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_accepts_plain_components() {
        for good in ["valid_name", "model-1.0.0", "ABC123"] {
            assert_eq!(sanitize_path_component(good), good);
        }
    }

    #[test]
    fn test_is_within_directory() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("a");
        std::fs::create_dir(&child).unwrap();

        assert!(is_within_directory(&child, dir.path()));
        assert!(is_within_directory(dir.path(), dir.path()));
        assert!(!is_within_directory(dir.path(), &child));
        assert!(!is_within_directory(&dir.path().join("missing"), dir.path()));
        assert!(!is_within_directory(&child.join(".."), &child));
    }

    #[test]
    fn test_identifier() {
        assert!(is_valid_identifier("stem_separator"));
        assert!(is_valid_identifier("A-1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("model.v1"));
        assert!(!is_valid_identifier("a b"));
    }
}
