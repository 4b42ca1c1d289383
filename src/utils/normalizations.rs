use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Aggressive normalisation used for names the catalogue treats as free text
/// (never for on-disk paths): NFKC fold, lowercase, strip everything but
/// alphanumerics and whitespace.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Unifies path separators so a track's stored path is stable across
/// platforms. Case is preserved deliberately: the path must still resolve
/// to the file that produced it.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.to_string_lossy().replace('\\', "/").into()
}

/// Lighter normalisation used only by the trigram matcher (spec §4.4):
/// lowercase and pad with two spaces on each side so every 3-character
/// window, including ones that touch word boundaries, is a valid trigram.
pub fn matcher_normalize(text: &str) -> String {
    format!("  {}  ", text.to_lowercase())
}

/// Strips Unicode combining marks (diacritics) after NFD decomposition. A
/// helper the caller may apply to a filter string before indexing; the
/// matcher itself does not assume diacritic stripping (spec §4.4).
pub fn strip_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !unicode_normalization::char::is_combining_mark(*c)).collect()
}

/// Every non-whitespace-only length-3 sliding window over `normalized`.
pub fn trigrams(normalized: &str) -> std::collections::HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    let mut set = std::collections::HashSet::new();

    if chars.len() < 3 {
        return set;
    }

    for window in chars.windows(3) {
        if window.iter().all(|c| c.is_whitespace()) {
            continue;
        }
        set.insert(window.iter().collect());
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_unifies_separators_and_keeps_case() {
        let p = normalize_path(Path::new(r"C:\Music\The Beatles\Abbey Road"));
        assert_eq!(p, PathBuf::from("C:/Music/The Beatles/Abbey Road"));
    }

    #[test]
    fn trigrams_skips_whitespace_only_windows() {
        let normalized = matcher_normalize("ab");
        let t = trigrams(&normalized);
        assert!(t.contains("  a"));
        assert!(t.contains(" ab"));
        assert!(t.contains("ab "));
        assert!(t.contains("b  "));
        assert!(!t.contains("   "));
    }

    #[test]
    fn strip_diacritics_removes_combining_marks() {
        assert_eq!(strip_diacritics("café"), "cafe");
    }
}
