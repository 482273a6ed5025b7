//! Placeholder substitution for the store's `$1..$N` parameterized SQL.
//!
//! Walks the SQL string once and replaces each `$N` token with its escaped
//! literal, rather than doing N regex passes — this is the fix the Design
//! Notes call for (§9 "Placeholder substitution via regex"): a single-pass
//! tokenizer can never confuse `$1` with the first digit of `$10`, since it
//! greedily consumes every following digit before looking up the index.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
    Decimal(rust_decimal::Decimal),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Param {
    /// Renders this value as a SQL literal using the same escaping rules
    /// `substitute` applies to `$N` placeholders. Used by the write layer
    /// to build multi-VALUES `bulkExec` statements, which take no
    /// placeholders of their own.
    pub fn literal(&self) -> String {
        self.render()
    }

    fn render(&self) -> String {
        match self {
            Param::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Param::Int(i) => i.to_string(),
            Param::Decimal(d) => d.to_string(),
            Param::Float(f) => f.to_string(),
            Param::Bool(b) => b.to_string(),
            Param::Timestamp(t) => format!("'{}'", t.to_rfc3339()),
            Param::Null => "NULL".to_string(),
        }
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<i32> for Param {
    fn from(i: i32) -> Self {
        Param::Int(i as i64)
    }
}

impl From<DateTime<Utc>> for Param {
    fn from(t: DateTime<Utc>) -> Self {
        Param::Timestamp(t)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}

/// Substitutes every `$N` (1-indexed) in `sql` with `params[N-1]`'s literal
/// rendering. `$N` is only recognized at a token boundary: the full run of
/// digits after `$` is parsed as the index, so `$10` is never split into
/// `$1` followed by a literal `0`.
pub fn substitute(sql: &str, params: &[Param]) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            let digits: String = chars[i + 1..j].iter().collect();
            let index: usize = digits.parse().expect("digit run parses as usize");
            match params.get(index - 1) {
                Some(p) => out.push_str(&p.render()),
                None => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dollar_1_does_not_match_inside_dollar_10() {
        let sql = "SELECT * FROM t WHERE a = $1 AND j = $10";
        let params: Vec<Param> = (1..=10)
            .map(|i| Param::Int(i))
            .collect();
        let rendered = substitute(sql, &params);
        assert!(rendered.contains("a = 1 "));
        assert!(rendered.contains("j = 10"));
        assert!(!rendered.contains("j = 10 0"));
    }

    #[test]
    fn strings_are_single_quoted_with_doubled_internal_quotes() {
        let rendered = substitute("INSERT INTO t VALUES ($1)", &[Param::Text("O'Brien".into())]);
        assert_eq!(rendered, "INSERT INTO t VALUES ('O''Brien')");
    }

    #[test]
    fn null_renders_as_null_keyword() {
        let rendered = substitute("UPDATE t SET a = $1", &[Param::Null]);
        assert_eq!(rendered, "UPDATE t SET a = NULL");
    }

    #[test]
    fn missing_param_leaves_token_untouched() {
        let rendered = substitute("SELECT $2", &[Param::Int(1)]);
        assert_eq!(rendered, "SELECT $2");
    }

    #[test]
    fn timestamp_renders_as_quoted_iso8601() {
        let t = chrono::Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let rendered = substitute("SELECT $1", &[Param::Timestamp(t)]);
        assert!(rendered.starts_with('\''));
        assert!(rendered.contains("2024-01-05"));
    }
}
