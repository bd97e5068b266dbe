//! SQL fingerprinting.
//!
//! A fingerprint is the canonical form of a statement: literals replaced
//! with `?`, whitespace runs collapsed, case folded outside literals, and
//! `IN` lists of placeholders collapsed to `(?+)`. Two statements that
//! differ only in literal values share a fingerprint, which is what the
//! blacklist and the slow/error SQL caches key on.

/// Canonicalize a statement. Never fails; garbage in, garbage fingerprint out.
pub fn fingerprint(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            i = skip_quoted(&chars, i);
            out.push('?');
            continue;
        }

        if c.is_ascii_digit() {
            // digits inside an identifier (t1, col2) are not literals
            let in_identifier = out
                .chars()
                .last()
                .is_some_and(|p| p.is_alphanumeric() || p == '_');
            if in_identifier {
                out.push(c);
                i += 1;
                continue;
            }
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            out.push('?');
            continue;
        }

        if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            continue;
        }

        out.push(c.to_ascii_lowercase());
        i += 1;
    }

    while out.ends_with(' ') || out.ends_with(';') {
        out.pop();
    }

    collapse_in_lists(&out)
}

/// Lowercase hex md5 of `input`.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Skip a quoted literal starting at `start`; returns the index one past the
/// closing quote. Handles backslash escapes and doubled quotes. An
/// unterminated literal swallows the rest of the statement.
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    chars.len()
}

/// Collapse `in (?, ?, ?)` to `in (?+)` so list arity does not split
/// fingerprints.
fn collapse_in_lists(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find("in (") {
        let word_boundary = rest[..pos]
            .chars()
            .last()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        let after = &rest[pos + 4..];
        if word_boundary {
            if let Some(close) = after.find(')') {
                let inner = &after[..close];
                if !inner.is_empty() && inner.chars().all(|c| matches!(c, '?' | ',' | ' ')) {
                    out.push_str(&rest[..pos]);
                    out.push_str("in (?+)");
                    rest = &after[close + 1..];
                    continue;
                }
            }
        }
        out.push_str(&rest[..pos + 4]);
        rest = after;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_literal_folds() {
        assert_eq!(
            fingerprint("SELECT * FROM users WHERE id=7"),
            "select * from users where id=?"
        );
    }

    #[test]
    fn test_placeholder_form_is_fixed_point() {
        let canonical = "select * from users where id=?";
        assert_eq!(fingerprint(canonical), canonical);
        assert_eq!(
            fingerprint("SELECT * FROM users WHERE id=7"),
            fingerprint(canonical)
        );
    }

    #[test]
    fn test_string_literal_folds() {
        assert_eq!(
            fingerprint("select id from t where name = 'alice'"),
            "select id from t where name = ?"
        );
        assert_eq!(
            fingerprint(r#"select id from t where name = "bo\"b""#),
            "select id from t where name = ?"
        );
    }

    #[test]
    fn test_doubled_quote_escape() {
        assert_eq!(
            fingerprint("select 1 from t where a = 'it''s'"),
            "select ? from t where a = ?"
        );
    }

    #[test]
    fn test_whitespace_and_case_normalized() {
        assert_eq!(
            fingerprint("  SELECT   *\n\tFROM users  "),
            "select * from users"
        );
    }

    #[test]
    fn test_identifier_digits_survive() {
        assert_eq!(
            fingerprint("select c1 from t1 where a1 = 3"),
            "select c1 from t1 where a1 = ?"
        );
    }

    #[test]
    fn test_in_list_collapses() {
        assert_eq!(
            fingerprint("select * from t where id in (1, 2, 3)"),
            "select * from t where id in (?+)"
        );
        assert_eq!(
            fingerprint("select * from t where id IN (4)"),
            "select * from t where id in (?+)"
        );
    }

    #[test]
    fn test_trailing_semicolon_dropped() {
        assert_eq!(fingerprint("select 1;"), "select ?");
    }

    #[test]
    fn test_md5_hex_known_vector() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_unterminated_literal_swallows_tail() {
        assert_eq!(fingerprint("select 'oops"), "select ?");
    }
}
