//! SQL template normalization using nom.
//!
//! Collapses a raw statement into a literal-insensitive template so that
//! executions differing only in literal values group together.
//!
//! ```text
//! SELECT * FROM t WHERE id = 42 AND name = 'bob' -- lookup
//!                            ──        ─────       ────────
//!                            │         │           └── stripped
//!                            │         └── string literal → ?
//!                            └── numeric literal → ?
//!
//! select * from t where id = ? and name = ?
//! ```
//!
//! Normalization never fails. Malformed input (unterminated strings or
//! comments) is consumed to the end and yields a best-effort template.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_till, take_until, take_while1},
    character::complete::{anychar, char, digit1, satisfy},
    combinator::{map, not, opt, peek, recognize, rest},
    multi::many0,
    sequence::{pair, terminated, tuple},
    IResult,
};
use serde::Serialize;
use std::fmt;

/// Token emitted in place of every masked literal.
pub const PLACEHOLDER: &str = "?";

/// Keywords lower-cased during normalization. Everything else keeps its case.
const KEYWORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "count", "create", "cross",
    "delete", "desc", "distinct", "else", "end", "except", "exists", "false", "fetch", "first",
    "for", "from", "full", "group", "having", "ilike", "in", "index", "inner", "insert",
    "intersect", "into", "is", "join", "last", "lateral", "left", "like", "limit", "lock",
    "natural", "next", "not", "null", "nulls", "offset", "on", "only", "or", "order", "outer",
    "over", "partition", "returning", "right", "rows", "select", "set", "some", "table", "then",
    "true", "union", "update", "using", "values", "when", "where", "window", "with",
];

/// A normalized statement: keywords lower-cased, comments stripped,
/// literals replaced by [`PLACEHOLDER`], whitespace collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SqlTemplate(String);

impl SqlTemplate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `max_chars` characters of the template.
    pub fn truncated(&self, max_chars: usize) -> String {
        self.0.chars().take(max_chars).collect()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SqlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SqlTemplate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a statement into its grouping template.
///
/// Idempotent: `normalize(normalize(s).as_str()) == normalize(s)`.
///
/// # Example
///
/// ```
/// use pgadvise::normalize::normalize;
///
/// let a = normalize("SELECT * FROM t WHERE id = 1");
/// let b = normalize("select *   from t where id = 2");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "select * from t where id = ?");
/// ```
pub fn normalize(sql: &str) -> SqlTemplate {
    let mut out = String::with_capacity(sql.len());

    for token in tokenize(sql) {
        match token {
            Token::Comment | Token::Space => push_space(&mut out),
            Token::StringLit(_) | Token::Number(_) => out.push_str(PLACEHOLDER),
            Token::Word(word) => {
                if is_keyword(word) {
                    out.push_str(&word.to_ascii_lowercase());
                } else {
                    out.push_str(word);
                }
            }
            Token::QuotedIdent(text) | Token::Param(text) | Token::Other(text) => {
                out.push_str(text)
            }
        }
    }

    SqlTemplate(out.trim().to_string())
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Lexical units the normalizer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Comment,
    Space,
    StringLit(&'a str),
    QuotedIdent(&'a str),
    Param(&'a str),
    Number(&'a str),
    Word(&'a str),
    Other(&'a str),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    while !remaining.is_empty() {
        match parse_token(remaining) {
            Ok((rest, token)) => {
                tokens.push(token);
                remaining = rest;
            }
            Err(_) => break,
        }
    }

    tokens
}

fn parse_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        map(alt((line_comment, block_comment)), |_| Token::Comment),
        map(take_while1(char::is_whitespace), |_| Token::Space),
        map(string_literal, Token::StringLit),
        map(quoted_ident, Token::QuotedIdent),
        map(param, Token::Param),
        map(number, Token::Number),
        map(word, Token::Word),
        map(recognize(anychar), Token::Other),
    ))(input)
}

/// `-- ...` up to (not including) the newline.
fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("--"), take_till(|c| c == '\n')))(input)
}

/// `/* ... */`; an unterminated comment runs to the end.
fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        tag("/*"),
        alt((terminated(take_until("*/"), tag("*/")), rest)),
    ))(input)
}

/// `'...'` with `''` escapes; an unterminated literal runs to the end.
fn string_literal(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('\''),
        many0(alt((is_not("'"), tag("''")))),
        opt(char('\'')),
    )))(input)
}

fn quoted_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((char('"'), take_till(|c| c == '"'), opt(char('"')))))(input)
}

/// Positional parameter `$1`.
fn param(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('$'), digit1))(input)
}

/// A standalone numeric literal: digits with an optional fraction, not
/// glued to a following identifier character.
fn number(input: &str) -> IResult<&str, &str> {
    terminated(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        not(peek(satisfy(is_word_char))),
    )(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char)(input)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(sql: &str) -> String {
        normalize(sql).into_string()
    }

    #[test]
    fn test_literal_insensitive() {
        assert_eq!(
            norm("select * from t where id=1"),
            norm("select * from t where id=2")
        );
        assert_eq!(
            norm("SELECT * FROM users WHERE email = 'a@b.c'"),
            norm("select * from users where email = 'x@y.z'")
        );
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "SELECT * FROM t WHERE id = 1",
            "select a, b from t -- trailing\nwhere x = 'it''s' and y > 3.5",
            "/* header */ SELECT\n\t1",
            "select 'unterminated",
            "select /* open comment",
            "select \"Weird Col\" from \"T\" where v = $1 and w = ?",
            "",
            "   ",
        ];
        for s in samples {
            let once = norm(s);
            assert_eq!(norm(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(
            norm("select a -- pick a\nfrom t /* the table */ where b = 1"),
            "select a from t where b = ?"
        );
    }

    #[test]
    fn test_keywords_lowercased_identifiers_kept() {
        assert_eq!(
            norm("SELECT UserName FROM Accounts WHERE Active IS NOT NULL"),
            "select UserName from Accounts where Active is not null"
        );
    }

    #[test]
    fn test_numbers_inside_identifiers_kept() {
        assert_eq!(norm("select t1.c2 from t1 where c2 = 10"), "select t1.c2 from t1 where c2 = ?");
    }

    #[test]
    fn test_decimal_and_escaped_string() {
        assert_eq!(norm("select 3.14, 'it''s'"), "select ?, ?");
    }

    #[test]
    fn test_params_kept() {
        assert_eq!(norm("select * from t where id = $1"), "select * from t where id = $1");
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(norm("  select\n\n  *\tfrom   t  "), "select * from t");
    }

    #[test]
    fn test_unicode_whitespace_collapsed() {
        assert_eq!(norm("select\u{0b}\u{0c} 1"), norm("select 1"));
        assert_eq!(norm("select\u{a0}a\u{2003}from\u{85}t"), "select a from t");
    }

    #[test]
    fn test_malformed_best_effort() {
        assert_eq!(norm("select 'abc"), "select ?");
        assert_eq!(norm("select 1 /* never closed"), "select ?");
    }

    #[test]
    fn test_truncated_counts_chars() {
        let t = normalize("select 'ñ' as ñame");
        assert_eq!(t.truncated(9), "select ? ");
        assert_eq!(t.truncated(500), t.as_str());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_literal() -> impl Strategy<Value = String> {
            prop_oneof![
                any::<u32>().prop_map(|n| n.to_string()),
                (any::<u16>(), any::<u16>()).prop_map(|(a, b)| format!("{}.{}", a, b)),
                "[a-zA-Z0-9 ,%@]{0,12}".prop_map(|s| format!("'{}'", s)),
                "[a-z]{0,6}".prop_map(|s| format!("'{}''{}'", s, s)),
            ]
        }

        proptest! {
            #[test]
            fn normalize_is_idempotent(sql in any::<String>()) {
                let once = norm(&sql);
                prop_assert_eq!(norm(&once), once);
            }

            #[test]
            fn normalize_is_idempotent_on_sql_like_text(
                sql in "[a-zA-Z0-9_ \t\n\u{0b}\u{0c}'\"$.,*=<>()/-]{0,40}"
            ) {
                let once = norm(&sql);
                prop_assert_eq!(norm(&once), once);
            }

            #[test]
            fn normalize_ignores_literal_values(
                a in arb_literal(),
                b in arb_literal(),
                ws in "[ \t\n\u{0b}\u{0c}\u{a0}]{1,3}",
            ) {
                let template = "SELECT * FROM orders WHERE id ={ws}{lit} AND note = {lit2}";
                let left = template.replace("{ws}", &ws).replace("{lit}", &a).replace("{lit2}", &b);
                let right = template.replace("{ws}", " ").replace("{lit}", &b).replace("{lit2}", &a);
                prop_assert_eq!(norm(&left), norm(&right));
            }
        }
    }
}
