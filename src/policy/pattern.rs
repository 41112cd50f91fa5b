//! Exclusion pattern matching.
//!
//! Patterns are matched against the whole subject. `*` matches any run of
//! characters (including none); every other character, `?` and `[` included,
//! must match literally. Matching is case-sensitive.

/// Match `subject` against a single exclusion pattern.
pub fn glob_match(pattern: &str, subject: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = subject.chars().collect();

    let (mut pi, mut si) = (0usize, 0usize);
    // Position of the last `*` seen and the subject index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, si));
            pi += 1;
        } else if pi < p.len() && p[pi] == s[si] {
            pi += 1;
            si += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last star swallow one more character.
            pi = star + 1;
            si = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// True when any pattern matches the subject.
pub fn matches_any<'a>(patterns: impl IntoIterator<Item = &'a String>, subject: &str) -> bool {
    patterns.into_iter().any(|p| glob_match(p, subject))
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn literal_patterns_need_an_exact_match() {
        assert!(glob_match("nginx:latest", "nginx:latest"));
        assert!(!glob_match("nginx:latest", "nginx:latest2"));
        assert!(!glob_match("nginx", "nginx:latest"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match("prod-*", "prod-1"));
        assert!(glob_match("prod-*", "prod-"));
        assert!(glob_match("*:latest", "registry.local/app:latest"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(glob_match("a*b*c", "abc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match("*app*", "registry/app:1.0"));
    }

    #[test]
    fn star_backtracks_over_repeated_suffixes() {
        assert!(glob_match("*ab", "aab"));
        assert!(glob_match("*-prod-*", "eu-prod-prod-1"));
        assert!(!glob_match("*ab", "aabx"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!glob_match("Prod-*", "prod-1"));
        assert!(!glob_match("prod-*", "PROD-1"));
    }

    #[test]
    fn question_mark_and_brackets_are_literal() {
        assert!(!glob_match("app:v?", "app:v1"));
        assert!(glob_match("app:v?", "app:v?"));
        assert!(!glob_match("app:[12]", "app:1"));
    }

    #[test]
    fn empty_pattern_only_matches_empty_subject() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }
}
