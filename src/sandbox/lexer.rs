use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    /// Raw body of an `f"..."` string; placeholders are parsed later.
    FStr(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Amp,
    Pipe,
    Tilde,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Split snippet source into tokens. Newlines inside brackets are dropped so
/// calls and literals may span lines; `;` acts as a newline.
pub fn tokenize(src: &str) -> Result<Vec<Token>, SandboxError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut depth: usize = 0;

    let syntax = |line: usize, message: String| SandboxError::Syntax { line, message };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' | ';' => {
                if depth == 0 {
                    out.push(Token { tok: Tok::Newline, line });
                }
                if c == '\n' {
                    line += 1;
                }
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                line += 1;
                i += 2;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax(line, format!("bad number '{text}'")))?;
                out.push(Token { tok: Tok::Num(value), line });
            }
            '"' | '\'' => {
                let (body, next) = read_string(&chars, i, c)
                    .ok_or_else(|| syntax(line, "unterminated string".into()))?;
                out.push(Token { tok: Tok::Str(body), line });
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                // f-strings: f"..." / f'...'
                if (c == 'f' || c == 'F')
                    && matches!(chars.get(i + 1), Some('"') | Some('\''))
                {
                    let quote = chars[i + 1];
                    let (body, next) = read_raw_string(&chars, i + 1, quote)
                        .ok_or_else(|| syntax(line, "unterminated f-string".into()))?;
                    out.push(Token { tok: Tok::FStr(body), line });
                    i = next;
                    continue;
                }
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Token {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line,
                });
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (tok, width) = match (c, next) {
                    ('*', Some('*')) => (Tok::StarStar, 2),
                    ('<', Some('=')) => (Tok::Le, 2),
                    ('>', Some('=')) => (Tok::Ge, 2),
                    ('=', Some('=')) => (Tok::EqEq, 2),
                    ('!', Some('=')) => (Tok::Ne, 2),
                    ('(', _) => (Tok::LParen, 1),
                    (')', _) => (Tok::RParen, 1),
                    ('[', _) => (Tok::LBracket, 1),
                    (']', _) => (Tok::RBracket, 1),
                    ('{', _) => (Tok::LBrace, 1),
                    ('}', _) => (Tok::RBrace, 1),
                    (',', _) => (Tok::Comma, 1),
                    (':', _) => (Tok::Colon, 1),
                    ('.', _) => (Tok::Dot, 1),
                    ('=', _) => (Tok::Assign, 1),
                    ('+', _) => (Tok::Plus, 1),
                    ('-', _) => (Tok::Minus, 1),
                    ('*', _) => (Tok::Star, 1),
                    ('/', _) => (Tok::Slash, 1),
                    ('%', _) => (Tok::Percent, 1),
                    ('<', _) => (Tok::Lt, 1),
                    ('>', _) => (Tok::Gt, 1),
                    ('&', _) => (Tok::Amp, 1),
                    ('|', _) => (Tok::Pipe, 1),
                    ('~', _) => (Tok::Tilde, 1),
                    _ => return Err(syntax(line, format!("unexpected character '{c}'"))),
                };
                match tok {
                    Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
                    Tok::RParen | Tok::RBracket | Tok::RBrace => depth = depth.saturating_sub(1),
                    _ => {}
                }
                out.push(Token { tok, line });
                i += width;
            }
        }
    }

    out.push(Token { tok: Tok::Newline, line });
    out.push(Token { tok: Tok::Eof, line });
    Ok(out)
}

/// Read a quoted string starting at `start` (the quote), handling escapes.
/// Returns the body and the index after the closing quote.
fn read_string(chars: &[char], start: usize, quote: char) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Some((body, i + 1)),
            '\\' => {
                let esc = *chars.get(i + 1)?;
                body.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            '\n' => return None,
            c => {
                body.push(c);
                i += 1;
            }
        }
    }
    None
}

/// Like [`read_string`] but keeps escapes as written (f-string bodies are
/// unescaped after placeholders are split out).
fn read_raw_string(chars: &[char], start: usize, quote: char) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Some((body, i + 1)),
            '\\' => {
                body.push('\\');
                body.push(*chars.get(i + 1)?);
                i += 2;
            }
            '\n' => return None,
            c => {
                body.push(c);
                i += 1;
            }
        }
    }
    None
}

/// Resolve backslash escapes in literal f-string text.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
