//! Token stream over a UTF-8 TOML buffer.
//!
//! The whole buffer is tokenized up front into a finite, restartable token
//! sequence; every token records the absolute byte range of the raw slice it
//! covers. Key tokens keep their spelling (bare, quoted, literal)
//! distinguishable; scalar value tokens carry their decoded value. The
//! tokenizer tracks the key/value context itself (left of `=` and inside
//! `[...]` headers keys are expected, right of `=` values), so a `3.14159`
//! on the left of an assignment comes out as two keys around a dot.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::{opt, recognize};
use nom::sequence::{pair, preceded, tuple};
use nom::IResult;
use nom::Offset;

use crate::error::{Result, TomlError};

/// Spelling of a key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Bare,
    /// `"..."` with the basic escape set.
    Quoted,
    /// `'...'` without escapes.
    Literal,
}

/// Quotation style of a string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Basic,
    Literal,
    MultiLineBasic,
    MultiLineLiteral,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Whitespace,
    NewLine,
    Comment,
    Key { name: String, kind: KeyKind },
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str { value: String, quote: QuoteKind },
    /// Recognized structurally, never interpreted.
    DateTime,
    Dot,
    Assign,
    Comma,
    ArrayOpen,
    ArrayClose,
    TableOpen,
    TableClose,
    TableArrayOpen,
    TableArrayClose,
    InlineTableOpen,
    InlineTableClose,
}

/// One token with its absolute byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn raw<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::NewLine | TokenKind::Comment
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ctx {
    Key,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Array,
    InlineTable,
}

/// Tokenize the complete buffer.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = src;
    let mut ctx = Ctx::Key;
    let mut frames: Vec<Frame> = Vec::new();
    // Some(true) while inside a `[[...]]` header, Some(false) inside `[...]`.
    let mut header: Option<bool> = None;

    while !rest.is_empty() {
        let at = src.offset(rest);
        let first = rest.chars().next().unwrap_or('\0');
        let (next_rest, kind) = match first {
            ' ' | '\t' => {
                let (r, _) = ws(rest).map_err(|_| unreachable(at))?;
                (r, TokenKind::Whitespace)
            }
            '\r' | '\n' => {
                let (r, _) =
                    newline(rest).map_err(|_| TomlError::parse(at, "stray carriage return"))?;
                if frames.last() == Some(&Frame::InlineTable) {
                    return Err(TomlError::parse(at, "newline inside inline table"));
                }
                if header.is_some() {
                    return Err(TomlError::parse(at, "newline inside table header"));
                }
                if frames.is_empty() {
                    ctx = Ctx::Key;
                }
                (r, TokenKind::NewLine)
            }
            '#' => {
                if frames.last() == Some(&Frame::InlineTable) || header.is_some() {
                    return Err(TomlError::parse(at, "comment not allowed here"));
                }
                let (r, _) = comment(rest).map_err(|_| unreachable(at))?;
                (r, TokenKind::Comment)
            }
            '[' if ctx == Ctx::Key && frames.is_empty() => {
                if header.is_some() {
                    return Err(TomlError::parse(at, "unexpected '[' inside table header"));
                }
                if rest.starts_with("[[") {
                    header = Some(true);
                    (&rest[2..], TokenKind::TableArrayOpen)
                } else {
                    header = Some(false);
                    (&rest[1..], TokenKind::TableOpen)
                }
            }
            '[' => {
                frames.push(Frame::Array);
                ctx = Ctx::Value;
                (&rest[1..], TokenKind::ArrayOpen)
            }
            ']' => match (header, frames.last().copied()) {
                (Some(true), _) => {
                    if !rest.starts_with("]]") {
                        return Err(TomlError::parse(at, "expected ']]' to close table array"));
                    }
                    header = None;
                    (&rest[2..], TokenKind::TableArrayClose)
                }
                (Some(false), _) => {
                    header = None;
                    (&rest[1..], TokenKind::TableClose)
                }
                (None, Some(Frame::Array)) => {
                    frames.pop();
                    ctx = Ctx::Value;
                    (&rest[1..], TokenKind::ArrayClose)
                }
                _ => return Err(TomlError::parse(at, "unexpected ']'")),
            },
            '{' if ctx == Ctx::Value => {
                frames.push(Frame::InlineTable);
                ctx = Ctx::Key;
                (&rest[1..], TokenKind::InlineTableOpen)
            }
            '}' => {
                if frames.pop() != Some(Frame::InlineTable) {
                    return Err(TomlError::parse(at, "unexpected '}'"));
                }
                ctx = Ctx::Value;
                (&rest[1..], TokenKind::InlineTableClose)
            }
            '=' if ctx == Ctx::Key => {
                ctx = Ctx::Value;
                (&rest[1..], TokenKind::Assign)
            }
            ',' => {
                match frames.last() {
                    Some(Frame::InlineTable) => ctx = Ctx::Key,
                    Some(Frame::Array) => ctx = Ctx::Value,
                    None => return Err(TomlError::parse(at, "unexpected ','")),
                }
                (&rest[1..], TokenKind::Comma)
            }
            '.' if ctx == Ctx::Key => (&rest[1..], TokenKind::Dot),
            _ if ctx == Ctx::Key => lex_key(rest, at)?,
            _ => lex_value(rest, at)?,
        };
        let end = src.offset(next_rest);
        tokens.push(Token {
            kind,
            start: at,
            end,
        });
        rest = next_rest;
    }

    if header.is_some() {
        return Err(TomlError::parse(src.len(), "unterminated table header"));
    }
    if let Some(frame) = frames.last() {
        let what = match frame {
            Frame::Array => "unterminated array",
            Frame::InlineTable => "unterminated inline table",
        };
        return Err(TomlError::parse(src.len(), what));
    }
    Ok(tokens)
}

fn unreachable(at: usize) -> TomlError {
    TomlError::parse(at, "lexer state error")
}

// --- trivia -----------------------------------------------------------------

fn ws(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ' || c == '\t')(input)
}

fn newline(input: &str) -> IResult<&str, &str> {
    alt((tag("\r\n"), tag("\n")))(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(
        tag("#"),
        take_while(|c| c != '\n' && c != '\r'),
    ))(input)
}

// --- keys -------------------------------------------------------------------

fn is_bare_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn bare_key(input: &str) -> IResult<&str, &str> {
    take_while1(is_bare_key_char)(input)
}

fn lex_key(rest: &str, at: usize) -> Result<(&str, TokenKind)> {
    let first = rest.chars().next().unwrap_or('\0');
    match first {
        '"' => {
            let (r, name) = single_line_basic(rest, at)?;
            Ok((
                r,
                TokenKind::Key {
                    name,
                    kind: KeyKind::Quoted,
                },
            ))
        }
        '\'' => {
            let (r, name) = single_line_literal(rest, at)?;
            Ok((
                r,
                TokenKind::Key {
                    name,
                    kind: KeyKind::Literal,
                },
            ))
        }
        _ => match bare_key(rest) {
            Ok((r, name)) => Ok((
                r,
                TokenKind::Key {
                    name: name.to_string(),
                    kind: KeyKind::Bare,
                },
            )),
            Err(_) => Err(TomlError::parse(at, format!("expected a key, found {first:?}"))),
        },
    }
}

// --- strings ----------------------------------------------------------------

fn decode_escape(rest: &str, at: usize) -> Result<(usize, char)> {
    // `rest` starts right after the backslash.
    let mut chars = rest.chars();
    let esc = chars
        .next()
        .ok_or_else(|| TomlError::parse(at, "unterminated escape sequence"))?;
    let simple = |c| Ok((1, c));
    match esc {
        'b' => simple('\u{8}'),
        't' => simple('\t'),
        'n' => simple('\n'),
        'f' => simple('\u{c}'),
        'r' => simple('\r'),
        '"' => simple('"'),
        '\\' => simple('\\'),
        'u' | 'U' => {
            let digits = if esc == 'u' { 4 } else { 8 };
            let hex = rest
                .get(1..1 + digits)
                .ok_or_else(|| TomlError::parse(at, "truncated unicode escape"))?;
            let code = u32::from_str_radix(hex, 16)
                .map_err(|_| TomlError::parse(at, "invalid unicode escape"))?;
            let c = char::from_u32(code)
                .ok_or_else(|| TomlError::parse(at, "escape is not a unicode scalar"))?;
            Ok((1 + digits, c))
        }
        other => Err(TomlError::parse(at, format!("invalid escape '\\{other}'"))),
    }
}

/// `"..."`, also used for quoted keys.
fn single_line_basic(rest: &str, at: usize) -> Result<(&str, String)> {
    debug_assert!(rest.starts_with('"'));
    let body = &rest[1..];
    let mut out = String::new();
    let mut idx = 0;
    let bytes = body.as_bytes();
    while idx < bytes.len() {
        let c = body[idx..].chars().next().unwrap();
        match c {
            '"' => return Ok((&body[idx + 1..], out)),
            '\n' | '\r' => break,
            '\\' => {
                let (len, decoded) = decode_escape(&body[idx + 1..], at + 1 + idx)?;
                out.push(decoded);
                idx += 1 + len;
            }
            c => {
                out.push(c);
                idx += c.len_utf8();
            }
        }
    }
    Err(TomlError::parse(at, "unterminated string"))
}

/// `'...'`, also used for literal keys.
fn single_line_literal(rest: &str, at: usize) -> Result<(&str, String)> {
    debug_assert!(rest.starts_with('\''));
    let body = &rest[1..];
    match body.find(['\'', '\n', '\r']) {
        Some(end) if body.as_bytes()[end] == b'\'' => {
            Ok((&body[end + 1..], body[..end].to_string()))
        }
        _ => Err(TomlError::parse(at, "unterminated literal string")),
    }
}

/// `"""..."""` with line-continuation backslash.
fn multi_line_basic(rest: &str, at: usize) -> Result<(&str, String)> {
    debug_assert!(rest.starts_with("\"\"\""));
    let mut body = &rest[3..];
    // A newline immediately following the opening delimiter is trimmed.
    if let Some(stripped) = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')) {
        body = stripped;
    }
    let mut out = String::new();
    let mut idx = 0;
    while idx < body.len() {
        let tail = &body[idx..];
        if tail.starts_with("\"\"\"") {
            // Up to two extra quotes belong to the content ("""" -> content ").
            let mut quotes = 0;
            while quotes < 2 && body[idx + quotes..].starts_with("\"\"\"\"") {
                quotes += 1;
            }
            for _ in 0..quotes {
                out.push('"');
            }
            return Ok((&body[idx + quotes + 3..], out));
        }
        let c = tail.chars().next().unwrap();
        if c == '\\' {
            let after = &tail[1..];
            // Line-continuation: backslash, optional whitespace, newline;
            // trims all whitespace including newlines that follow.
            let trimmed = after.trim_start_matches([' ', '\t']);
            if trimmed.starts_with('\n') || trimmed.starts_with("\r\n") {
                let skipped = after.trim_start_matches([' ', '\t', '\n', '\r']);
                idx = body.len() - skipped.len();
                continue;
            }
            let (len, decoded) = decode_escape(after, at + 3 + idx)?;
            out.push(decoded);
            idx += 1 + len;
        } else {
            out.push(c);
            idx += c.len_utf8();
        }
    }
    Err(TomlError::parse(at, "unterminated multi-line string"))
}

/// `'''...'''`, no escapes.
fn multi_line_literal(rest: &str, at: usize) -> Result<(&str, String)> {
    debug_assert!(rest.starts_with("'''"));
    let mut body = &rest[3..];
    if let Some(stripped) = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')) {
        body = stripped;
    }
    let mut idx = 0;
    while idx < body.len() {
        if body[idx..].starts_with("'''") {
            let mut quotes = 0;
            while quotes < 2 && body[idx + quotes..].starts_with("''''") {
                quotes += 1;
            }
            let content = format!("{}{}", &body[..idx], "'".repeat(quotes));
            return Ok((&body[idx + quotes + 3..], content));
        }
        idx += body[idx..].chars().next().unwrap().len_utf8();
    }
    Err(TomlError::parse(at, "unterminated multi-line literal string"))
}

// --- numbers & date-times ---------------------------------------------------

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn digits_underscore(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_digit() || c == '_')(input)
}

fn sign(input: &str) -> IResult<&str, &str> {
    recognize(opt(alt((tag("+"), tag("-")))))(input)
}

fn radix_int(input: &str) -> IResult<&str, &str> {
    recognize(alt((
        preceded(tag("0x"), take_while1(|c: char| c.is_ascii_hexdigit() || c == '_')),
        preceded(tag("0o"), take_while1(|c: char| ('0'..='7').contains(&c) || c == '_')),
        preceded(tag("0b"), take_while1(|c: char| c == '0' || c == '1' || c == '_')),
    )))(input)
}

fn float_body(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        digits_underscore,
        alt((
            // Fraction with an optional exponent.
            recognize(tuple((
                tag("."),
                digits_underscore,
                opt(tuple((alt((tag("e"), tag("E"))), sign, digits_underscore))),
            ))),
            // Exponent only.
            recognize(tuple((alt((tag("e"), tag("E"))), sign, digits_underscore))),
        )),
    )))(input)
}

fn special_float(input: &str) -> IResult<&str, &str> {
    recognize(pair(sign, alt((tag("inf"), tag("nan")))))(input)
}

fn check_underscores(raw: &str, at: usize) -> Result<()> {
    let stripped: &str = raw.trim_start_matches(['+', '-']);
    let body = stripped
        .strip_prefix("0x")
        .or_else(|| stripped.strip_prefix("0o"))
        .or_else(|| stripped.strip_prefix("0b"))
        .unwrap_or(stripped);
    let bytes = body.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'_' {
            let prev_digit = i > 0 && bytes[i - 1].is_ascii_alphanumeric();
            let next_digit = i + 1 < bytes.len() && bytes[i + 1].is_ascii_alphanumeric();
            if !prev_digit || !next_digit {
                return Err(TomlError::parse(at, "misplaced '_' digit separator"));
            }
        }
    }
    Ok(())
}

fn lex_number(rest: &str, at: usize) -> Result<(&str, TokenKind)> {
    // Specials first, then radix forms, then float (longest match), then int.
    if let Ok((r, raw)) = special_float(rest) {
        let v = if raw.ends_with("inf") {
            if raw.starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }
        } else if raw.starts_with('-') {
            -f64::NAN
        } else {
            f64::NAN
        };
        return Ok((r, TokenKind::Float(v)));
    }
    if let Ok((r, raw)) = radix_int(rest) {
        check_underscores(raw, at)?;
        let digits: String = raw[2..].chars().filter(|c| *c != '_').collect();
        let radix = match &raw[..2] {
            "0x" => 16,
            "0o" => 8,
            _ => 2,
        };
        let value = i64::from_str_radix(&digits, radix)
            .map_err(|_| TomlError::parse(at, "integer out of range"))?;
        return Ok((r, TokenKind::Integer(value)));
    }
    if let Ok((r, raw)) = recognize(pair(sign, float_body))(rest) {
        check_underscores(raw, at)?;
        let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
        let value: f64 = cleaned
            .parse()
            .map_err(|_| TomlError::parse(at, "malformed floating point number"))?;
        return Ok((r, TokenKind::Float(value)));
    }
    if let Ok((r, raw)) = recognize(pair(sign, digits_underscore))(rest) {
        check_underscores(raw, at)?;
        let body = raw.trim_start_matches(['+', '-']);
        if body.len() > 1 && body.starts_with('0') {
            return Err(TomlError::parse(at, "decimal integer with leading zero"));
        }
        let cleaned: String = raw.chars().filter(|c| *c != '_' && *c != '+').collect();
        let value: i64 = cleaned
            .parse()
            .map_err(|_| TomlError::parse(at, "integer out of range"))?;
        return Ok((r, TokenKind::Integer(value)));
    }
    Err(TomlError::parse(at, "expected a value"))
}

/// Recognize (but do not interpret) offset/local date-times, dates and times.
fn lex_datetime(rest: &str) -> Option<&str> {
    fn digits_n(s: &str, n: usize) -> bool {
        s.len() >= n && s.as_bytes()[..n].iter().all(|b| b.is_ascii_digit())
    }
    fn eat_time(mut s: &str) -> Option<&str> {
        if !(digits_n(s, 2) && s.as_bytes().get(2) == Some(&b':')) {
            return None;
        }
        if !digits_n(&s[3..], 2) || s.as_bytes().get(5) != Some(&b':') {
            return None;
        }
        if !digits_n(&s[6..], 2) {
            return None;
        }
        s = &s[8..];
        if s.starts_with('.') {
            let frac = s[1..].len() - s[1..].trim_start_matches(is_digit).len();
            if frac == 0 {
                return None;
            }
            s = &s[1 + frac..];
        }
        Some(s)
    }

    // Local time on its own.
    if digits_n(rest, 2) && rest.as_bytes().get(2) == Some(&b':') {
        return eat_time(rest);
    }
    // Full date.
    if !(digits_n(rest, 4) && rest.as_bytes().get(4) == Some(&b'-')) {
        return None;
    }
    if !(digits_n(&rest[5..], 2) && rest.as_bytes().get(7) == Some(&b'-') && digits_n(&rest[8..], 2))
    {
        return None;
    }
    let mut s = &rest[10..];
    // Optional time separated by 'T', 't' or a single space.
    let sep = s.chars().next();
    if matches!(sep, Some('T') | Some('t'))
        || (sep == Some(' ') && digits_n(&s[1..], 2) && s.as_bytes().get(3) == Some(&b':'))
    {
        s = eat_time(&s[1..])?;
        // Optional offset.
        if let Some(stripped) = s.strip_prefix(['Z', 'z']) {
            s = stripped;
        } else if s.starts_with(['+', '-'])
            && digits_n(&s[1..], 2)
            && s.as_bytes().get(3) == Some(&b':')
            && digits_n(&s[4..], 2)
        {
            s = &s[6..];
        }
    }
    Some(s)
}

fn lex_value(rest: &str, at: usize) -> Result<(&str, TokenKind)> {
    if rest.starts_with("\"\"\"") {
        let (r, value) = multi_line_basic(rest, at)?;
        return Ok((
            r,
            TokenKind::Str {
                value,
                quote: QuoteKind::MultiLineBasic,
            },
        ));
    }
    if rest.starts_with("'''") {
        let (r, value) = multi_line_literal(rest, at)?;
        return Ok((
            r,
            TokenKind::Str {
                value,
                quote: QuoteKind::MultiLineLiteral,
            },
        ));
    }
    if rest.starts_with('"') {
        let (r, value) = single_line_basic(rest, at)?;
        return Ok((
            r,
            TokenKind::Str {
                value,
                quote: QuoteKind::Basic,
            },
        ));
    }
    if rest.starts_with('\'') {
        let (r, value) = single_line_literal(rest, at)?;
        return Ok((
            r,
            TokenKind::Str {
                value,
                quote: QuoteKind::Literal,
            },
        ));
    }
    if let Some(r) = lex_datetime(rest) {
        return Ok((r, TokenKind::DateTime));
    }
    if let Some(r) = rest.strip_prefix("true") {
        return Ok((r, TokenKind::Bool(true)));
    }
    if let Some(r) = rest.strip_prefix("false") {
        return Ok((r, TokenKind::Bool(false)));
    }
    lex_number(rest, at)
}
