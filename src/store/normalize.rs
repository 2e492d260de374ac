//! Value normalization for unit records.
//!
//! A value is a list of clauses separated by newlines or semicolons. Each clause
//! has its whitespace collapsed, loses any space around `=` and `:`, and gets
//! exactly one space after every comma. Values holding more than one clause are
//! written with a leading newline so they land on continuation lines.

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*([=:])\s*").expect("Invalid separator regex"));

static COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("Invalid comma regex"));

/// Normalize a raw option value.
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)` for every input.
///
/// # Examples
///
/// ```
/// use iocmgr::store::normalize;
///
/// assert_eq!(normalize("a.db ,  P = X:"), "a.db, P=X:");
/// assert_eq!(normalize("A = 1; B=2"), "\nA=1\nB=2");
/// ```
pub fn normalize(value: &str) -> String {
    let clauses: Vec<String> = value
        .split(['\n', ';'])
        .map(normalize_clause)
        .filter(|clause| !clause.is_empty())
        .collect();

    match clauses.len() {
        0 => String::new(),
        1 => clauses.into_iter().next().unwrap_or_default(),
        _ => format!("\n{}", clauses.join("\n")),
    }
}

fn normalize_clause(clause: &str) -> String {
    let collapsed = WHITESPACE.replace_all(clause.trim(), " ");
    let separators = SEPARATOR.replace_all(&collapsed, "$1");
    let commas = COMMA.replace_all(&separators, ", ");
    commas.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize("  hello    world \t"), "hello world");
    }

    #[test]
    fn test_strips_space_around_separators() {
        assert_eq!(normalize("P = IOC : ai"), "P=IOC:ai");
    }

    #[test]
    fn test_single_space_after_comma() {
        assert_eq!(normalize("a.db,P=X ,  R=Y"), "a.db, P=X, R=Y");
        assert_eq!(normalize("trailing,"), "trailing,");
    }

    #[test]
    fn test_multi_clause_gets_leading_newline() {
        assert_eq!(normalize("A=1\nB=2"), "\nA=1\nB=2");
        assert_eq!(normalize("A=1;B=2;"), "\nA=1\nB=2");
        assert_eq!(normalize("\n\nA=1\n\n"), "A=1");
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" ; \n ;"), "");
    }

    #[test]
    fn test_comma_next_to_separator_is_stable() {
        let once = normalize("a , = b :, c");
        assert_eq!(normalize(&once), once);
    }
}
