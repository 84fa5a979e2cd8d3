/// Utility functions for SQL text handling, particularly placeholder rewriting
use regex::Regex;

// Regex compiled once as a lazy static for performance
static NAMED_PLACEHOLDER_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

/// Lexical context of a byte position in PostgreSQL SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexical {
    Code,
    /// `'...'`; a doubled `''` is a literal quote, backslashes are ordinary characters
    Single,
    /// `E'...'`; backslash escapes the next character
    EscapeString,
    Double,
    LineComment,
    /// `/* ... */`, nesting depth
    BlockComment(usize),
    /// `$tag$ ... $tag$`, holding the full delimiter
    Dollar(String),
}

/// Forward-only scanner that tracks whether a position is inside a literal or comment.
///
/// Positions must be queried in non-decreasing order; each byte is examined once.
pub struct LiteralScanner<'a> {
    sql: &'a str,
    offset: usize,
    state: Lexical,
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Length of a dollar-quote delimiter (`$$` or `$tag$`) at the start of `rest`
fn dollar_tag_len(rest: &str) -> Option<usize> {
    let body = rest.strip_prefix('$')?;
    let tag_len = body.find('$')?;
    let tag = &body[..tag_len];
    let valid = tag.chars().enumerate().all(|(i, ch)| {
        if i == 0 {
            ch.is_alphabetic() || ch == '_'
        } else {
            is_ident_char(ch)
        }
    });
    valid.then_some(tag_len + 2)
}

impl<'a> LiteralScanner<'a> {
    pub fn new(sql: &'a str) -> Self {
        LiteralScanner {
            sql,
            offset: 0,
            state: Lexical::Code,
        }
    }

    /// True when the byte at `pos` is inside a quoted string, quoted identifier or comment
    pub fn is_literal_at(&mut self, pos: usize) -> bool {
        while self.offset < pos {
            self.step();
        }
        self.state != Lexical::Code
    }

    fn step(&mut self) {
        let sql = self.sql;
        let rest = &sql[self.offset..];
        let Some(ch) = rest.chars().next() else {
            self.offset = sql.len();
            return;
        };
        let mut before = sql[..self.offset].chars().rev();
        let previous = before.next();
        let previous_is_ident = previous.is_some_and(is_ident_char);
        // `E'...'` only when the E is not the tail of an identifier
        let escape_prefix =
            matches!(previous, Some('E' | 'e')) && !before.next().is_some_and(is_ident_char);
        let mut advance = ch.len_utf8();

        match &mut self.state {
            Lexical::Code => match ch {
                '\'' => {
                    self.state = if escape_prefix {
                        Lexical::EscapeString
                    } else {
                        Lexical::Single
                    };
                }
                '"' => self.state = Lexical::Double,
                '-' if rest.starts_with("--") => {
                    self.state = Lexical::LineComment;
                    advance = 2;
                }
                '/' if rest.starts_with("/*") => {
                    self.state = Lexical::BlockComment(1);
                    advance = 2;
                }
                '$' if !previous_is_ident => {
                    if let Some(len) = dollar_tag_len(rest) {
                        self.state = Lexical::Dollar(rest[..len].to_string());
                        advance = len;
                    }
                }
                _ => {}
            },
            Lexical::Single => {
                if ch == '\'' {
                    self.state = Lexical::Code;
                }
            }
            Lexical::EscapeString => match ch {
                '\\' => advance += rest[1..].chars().next().map_or(0, char::len_utf8),
                '\'' => self.state = Lexical::Code,
                _ => {}
            },
            Lexical::Double => {
                if ch == '"' {
                    self.state = Lexical::Code;
                }
            }
            Lexical::LineComment => {
                if ch == '\n' {
                    self.state = Lexical::Code;
                }
            }
            Lexical::BlockComment(depth) => {
                if rest.starts_with("*/") {
                    *depth -= 1;
                    if *depth == 0 {
                        self.state = Lexical::Code;
                    }
                    advance = 2;
                } else if rest.starts_with("/*") {
                    *depth += 1;
                    advance = 2;
                }
            }
            Lexical::Dollar(tag) => {
                if rest.starts_with(tag.as_str()) {
                    advance = tag.len();
                    self.state = Lexical::Code;
                }
            }
        }

        self.offset = (self.offset + advance).min(sql.len());
    }
}

/// Check if a position in SQL is inside a string literal, quoted identifier or comment
pub fn is_in_quotes(sql: &str, pos: usize) -> bool {
    LiteralScanner::new(sql).is_literal_at(pos)
}

/// Strip a leading `@`, `:` or `$` from a parameter name
pub fn bare_parameter_name(name: &str) -> &str {
    name.trim_start_matches(['@', ':', '$'])
}

/// Rewrite `@name` placeholders outside literals and comments into positional ones.
///
/// Standard strings (`'...'` with `''` escapes), `E'...'` strings, quoted identifiers,
/// dollar-quoted strings and `--` / `/* */` comments are skipped, following
/// PostgreSQL's lexical rules with `standard_conforming_strings` on.
/// Each placeholder takes the position of the first parameter with the same bare name;
/// `placeholder_gen` receives that 1-based position. Unknown names are left untouched.
pub fn rewrite_named_placeholders(
    sql: &str,
    parameter_names: &[&str],
    placeholder_gen: &dyn Fn(usize) -> String,
) -> String {
    let mut rewritten = String::with_capacity(sql.len());
    let mut last_end = 0;
    let mut scanner = LiteralScanner::new(sql);

    for cap in NAMED_PLACEHOLDER_REGEX.captures_iter(sql) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        if scanner.is_literal_at(whole.start()) {
            continue;
        }

        let position = parameter_names
            .iter()
            .position(|candidate| bare_parameter_name(candidate) == name.as_str());
        if let Some(idx) = position {
            rewritten.push_str(&sql[last_end..whole.start()]);
            rewritten.push_str(&placeholder_gen(idx + 1));
            last_end = whole.end();
        }
    }

    rewritten.push_str(&sql[last_end..]);
    rewritten
}
