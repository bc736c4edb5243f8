//! Relaxed JSON normalization for predicates typed on a command line.
//!
//! Accepts bare identifier keys (`{a: 1}`, `{$gt: 3}`, `{a.b: 1}`) and
//! single-quoted strings, and rewrites them into strict JSON text.

use crate::error::{CairnError, Result};

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Rewrite relaxed JSON into strict JSON.
pub fn normalize(input: &str) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                let end = scan_string(&chars, i, '"')?;
                out.extend(&chars[i..=end]);
                i = end + 1;
            }
            '\'' => {
                let end = scan_string(&chars, i, '\'')?;
                out.push('"');
                let mut j = i + 1;
                while j < end {
                    match chars[j] {
                        '\\' if chars[j + 1] == '\'' => {
                            out.push('\'');
                            j += 2;
                        }
                        '\\' => {
                            out.push('\\');
                            out.push(chars[j + 1]);
                            j += 2;
                        }
                        '"' => {
                            out.push_str("\\\"");
                            j += 1;
                        }
                        other => {
                            out.push(other);
                            j += 1;
                        }
                    }
                }
                out.push('"');
                i = end + 1;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else if matches!(word.as_str(), "true" | "false" | "null") {
                    out.push_str(&word);
                } else {
                    return Err(CairnError::InvalidFilter(format!(
                        "unexpected bare word '{}' at offset {}",
                        word, start
                    )));
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Index of the closing quote of the string opened at `open`.
fn scan_string(chars: &[char], open: usize, quote: char) -> Result<usize> {
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return Ok(j),
            _ => j += 1,
        }
    }
    Err(CairnError::InvalidFilter(format!(
        "unterminated string starting at offset {}",
        open
    )))
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn parse(input: &str) -> Value {
        serde_json::from_str(&normalize(input).unwrap()).unwrap()
    }

    #[test]
    fn test_bare_keys() {
        assert_eq!(parse("{a:1}"), json!({"a": 1}));
        assert_eq!(parse("{ a.b : {$gt: 3} }"), json!({"a.b": {"$gt": 3}}));
        assert_eq!(parse("{flag: true, n: null}"), json!({"flag": true, "n": null}));
    }

    #[test]
    fn test_single_quotes() {
        assert_eq!(parse("{'name': 'it\\'s'}"), json!({"name": "it's"}));
        assert_eq!(parse("{name: 'say \"hi\"'}"), json!({"name": "say \"hi\""}));
    }

    #[test]
    fn test_strict_json_untouched() {
        let strict = r#"{"a": [1, 2, {"b": "x:y"}]}"#;
        assert_eq!(normalize(strict).unwrap(), strict);
    }

    #[test]
    fn test_errors() {
        assert!(normalize("{a: bogus}").is_err());
        assert!(normalize("{a: 'open").is_err());
    }

    proptest! {
        #[test]
        fn prop_strict_json_is_fixed_point(key in "[a-z]{1,8}", n in any::<i64>(), s in "[a-zA-Z0-9 ]{0,12}") {
            let value = json!({ key: { "n": n, "s": s } });
            let text = value.to_string();
            let normalized = normalize(&text).unwrap();
            prop_assert_eq!(serde_json::from_str::<Value>(&normalized).unwrap(), value);
        }

        #[test]
        fn prop_bare_key_equals_quoted(key in "[a-z_][a-z0-9_]{0,8}", n in -1000i64..1000) {
            prop_assume!(!matches!(key.as_str(), "true" | "false" | "null"));
            let relaxed = format!("{{{}: {}}}", key, n);
            let strict = format!("{{\"{}\": {}}}", key, n);
            prop_assert_eq!(parse(&relaxed), parse(&strict));
        }
    }
}
