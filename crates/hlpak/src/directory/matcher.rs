//! Name matching for directory searches

use super::FindType;

fn chars_equal(a: char, b: char, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase().eq(b.to_lowercase())
    }
}

/// Compare two names for equality under the case rule of `find`.
pub(crate) fn names_equal(a: &str, b: &str, find: FindType) -> bool {
    if find.contains(FindType::CASE_SENSITIVE) {
        a == b
    } else {
        a.chars().count() == b.chars().count()
            && a.chars().zip(b.chars()).all(|(x, y)| chars_equal(x, y, false))
    }
}

/// Whether `name` matches `pattern` in the mode selected by `find`.
///
/// `MODE_STRING` compares whole names, `MODE_SUBSTRING` looks for the
/// pattern anywhere in the name, otherwise the pattern is a wildcard.
pub fn matches(name: &str, pattern: &str, find: FindType) -> bool {
    let case_sensitive = find.contains(FindType::CASE_SENSITIVE);

    if find.contains(FindType::MODE_STRING) {
        return names_equal(name, pattern, find);
    }

    if find.contains(FindType::MODE_SUBSTRING) {
        if case_sensitive {
            return name.contains(pattern);
        }
        return name.to_lowercase().contains(&pattern.to_lowercase());
    }

    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    wildcard(&name, &pattern, case_sensitive)
}

/// `*` matches any run (tried at every suffix), `?` exactly one character.
fn wildcard(mut name: &[char], mut pattern: &[char], case_sensitive: bool) -> bool {
    while let Some((&p, rest)) = pattern.split_first() {
        match p {
            '*' => {
                if rest.first() == Some(&'*') {
                    pattern = rest;
                    continue;
                }
                if rest.is_empty() {
                    return true;
                }
                return (0..name.len()).any(|i| wildcard(&name[i..], rest, case_sensitive));
            }
            '?' => {
                let Some((_, tail)) = name.split_first() else {
                    return false;
                };
                name = tail;
                pattern = rest;
            }
            _ => {
                let Some((&c, tail)) = name.split_first() else {
                    return false;
                };
                if !chars_equal(c, p, case_sensitive) {
                    return false;
                }
                name = tail;
                pattern = rest;
            }
        }
    }
    name.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WILD: FindType = FindType::ALL;

    #[test]
    fn test_wildcard_cases() {
        assert!(matches("abcdef", "a*f", WILD));
        assert!(!matches("abcdef", "a*g", WILD));
        assert!(matches("abc", "a?c", WILD));
        assert!(!matches("abc", "a?", WILD));
    }

    #[test]
    fn test_wildcard_star_edges() {
        assert!(matches("anything.bsp", "*", WILD));
        assert!(matches("maps/c1a0.bsp", "*.bsp", WILD));
        assert!(matches("a", "a*", WILD));
        assert!(matches("abc", "a**c", WILD));
        assert!(!matches("", "*x", WILD));
        assert!(matches("", "", WILD));
        assert!(!matches("abc", "", WILD));
    }

    #[test]
    fn test_case_rules() {
        assert!(matches("README.TXT", "readme.*", WILD));
        assert!(!matches(
            "README.TXT",
            "readme.*",
            WILD | FindType::CASE_SENSITIVE
        ));
    }

    #[test]
    fn test_string_and_substring_modes() {
        let exact = WILD | FindType::MODE_STRING;
        assert!(matches("Half-Life.gcf", "half-life.GCF", exact));
        assert!(!matches("Half-Life.gcf", "half-life", exact));
        // Wildcards are literal outside wildcard mode.
        assert!(!matches("abc", "a*", exact));

        let sub = WILD | FindType::MODE_SUBSTRING;
        assert!(matches("sound/ambience/wind.wav", "AMBIENCE", sub));
        assert!(!matches(
            "sound/ambience/wind.wav",
            "AMBIENCE",
            sub | FindType::CASE_SENSITIVE
        ));
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(name in "[a-zA-Z0-9_.]{0,16}") {
            prop_assert!(matches(&name, &name, WILD | FindType::CASE_SENSITIVE));
        }

        #[test]
        fn star_prefix_matches_any_suffix(prefix in "[a-z]{0,8}", suffix in "[a-z]{1,8}") {
            let name = format!("{prefix}{suffix}");
            let pattern = format!("*{suffix}");
            prop_assert!(matches(&name, &pattern, WILD));
        }

        #[test]
        fn question_marks_match_exact_length(name in "[a-z]{0,12}") {
            let pattern = "?".repeat(name.chars().count());
            prop_assert!(matches(&name, &pattern, WILD));
            let longer = format!("{pattern}?");
            prop_assert!(!matches(&name, &longer, WILD));
        }
    }
}
