use super::UdfError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    // Keywords.
    Lambda,
    And,
    Or,
    Not,
    If,
    Else,
    True,
    False,
    // Punctuation.
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub(crate) fn line_col_1based(input: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(input.len());
    let mut line = 1;
    let mut col = 1;
    for c in input[..offset].chars() {
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

pub(crate) fn parse_err(input: &str, span: Span, message: impl Into<String>) -> UdfError {
    let (line, col) = line_col_1based(input, span.start);
    UdfError::Parse {
        line,
        col,
        message: message.into(),
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "lambda" => TokenKind::Lambda,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "True" => TokenKind::True,
        "False" => TokenKind::False,
        _ => return None,
    })
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, UdfError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;

        if b.is_ascii_whitespace() || b == b'\\' {
            // Backslash line continuations are whitespace here.
            i += 1;
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let (kind, end) = number(input, start)?;
            tokens.push(Token {
                kind,
                span: Span { start, end },
            });
            i = end;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &input[start..i];
            let kind = keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()));
            tokens.push(Token {
                kind,
                span: Span { start, end: i },
            });
            continue;
        }

        if b == b'\'' || b == b'"' {
            let (s, end) = string(input, start)?;
            tokens.push(Token {
                kind: TokenKind::Str(s),
                span: Span { start, end },
            });
            i = end;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (kind, len) = match (b, next) {
            (b'*', Some(b'*')) => (TokenKind::StarStar, 2),
            (b'/', Some(b'/')) => (TokenKind::SlashSlash, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::Ne, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b'[', _) => (TokenKind::LBracket, 1),
            (b']', _) => (TokenKind::RBracket, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(parse_err(
                    input,
                    Span {
                        start,
                        end: start + ch.len_utf8(),
                    },
                    format!("unexpected character '{ch}'"),
                ));
            }
        };
        tokens.push(Token {
            kind,
            span: Span {
                start,
                end: start + len,
            },
        });
        i += len;
    }

    Ok(tokens)
}

fn number(input: &str, start: usize) -> Result<(TokenKind, usize), UdfError> {
    let bytes = input.as_bytes();
    let mut i = start;
    let mut is_float = false;

    let digits = |i: &mut usize| {
        while *i < bytes.len() && (bytes[*i].is_ascii_digit() || bytes[*i] == b'_') {
            *i += 1;
        }
    };

    digits(&mut i);
    if i < bytes.len() && bytes[i] == b'.' {
        is_float = true;
        i += 1;
        digits(&mut i);
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_float = true;
            i = j;
            digits(&mut i);
        }
    }

    let span = Span { start, end: i };
    let text: String = input[start..i].chars().filter(|c| *c != '_').collect();
    let kind = if is_float {
        text.parse::<f64>()
            .map(TokenKind::Float)
            .map_err(|e| parse_err(input, span, format!("invalid float literal: {e}")))?
    } else {
        text.parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|e| parse_err(input, span, format!("invalid integer literal: {e}")))?
    };
    Ok((kind, i))
}

fn string(input: &str, start: usize) -> Result<(String, usize), UdfError> {
    let mut chars = input[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(parse_err(input, Span { start, end: start }, "expected string"));
    };
    let mut out = String::new();
    while let Some((off, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, start + off + c.len_utf8())),
            '\\' => {
                let Some((_, esc)) = chars.next() else { break };
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            '\n' => break,
            c => out.push(c),
        }
    }
    Err(parse_err(
        input,
        Span {
            start,
            end: input.len(),
        },
        "unterminated string literal",
    ))
}
