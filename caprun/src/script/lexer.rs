//! Tokenizer for the task script subset.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(f64),

    // Keywords
    Let,
    Const,
    If,
    Else,
    True,
    False,
    Null,
    Undefined,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semi,
    Question,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
}

/// A token with the 1-based source line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
            i += 2;
            let mut closed = false;
            while i + 1 < chars.len() {
                if chars[i] == '\n' {
                    line += 1;
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    closed = true;
                    break;
                }
                i += 1;
            }
            if !closed {
                return Err(ScriptError::new(format!(
                    "line {}: unterminated block comment",
                    line
                )));
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                ScriptError::new(format!("line {}: invalid number literal '{}'", line, text))
            })?;
            tokens.push(Spanned {
                token: Token::Num(value),
                line,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.as_str() {
                "let" | "var" => Token::Let,
                "const" => Token::Const,
                "if" => Token::If,
                "else" => Token::Else,
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "undefined" => Token::Undefined,
                _ => Token::Ident(word),
            };
            tokens.push(Spanned { token, line });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i];
                if ch == quote {
                    i += 1;
                    closed = true;
                    break;
                }
                if ch == '\n' {
                    break;
                }
                if ch == '\\' && i + 1 < chars.len() {
                    i += 1;
                    let escaped = chars[i];
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '\'' => '\'',
                        '"' => '"',
                        other => other,
                    });
                    i += 1;
                    continue;
                }
                text.push(ch);
                i += 1;
            }
            if !closed {
                return Err(ScriptError::new(format!(
                    "line {}: unterminated string literal",
                    start_line
                )));
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                line: start_line,
            });
            continue;
        }

        // Multi-character operators first.
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let (token, width) = if rest.starts_with("===") {
            (Token::EqEq, 3)
        } else if rest.starts_with("!==") {
            (Token::NotEq, 3)
        } else if rest.starts_with("==") {
            (Token::EqEq, 2)
        } else if rest.starts_with("!=") {
            (Token::NotEq, 2)
        } else if rest.starts_with("<=") {
            (Token::LtEq, 2)
        } else if rest.starts_with(">=") {
            (Token::GtEq, 2)
        } else if rest.starts_with("&&") {
            (Token::AndAnd, 2)
        } else if rest.starts_with("||") {
            (Token::OrOr, 2)
        } else {
            let single = match c {
                '(' => Token::LParen,
                ')' => Token::RParen,
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                '.' => Token::Dot,
                ':' => Token::Colon,
                ';' => Token::Semi,
                '?' => Token::Question,
                '=' => Token::Assign,
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '<' => Token::Lt,
                '>' => Token::Gt,
                '!' => Token::Bang,
                other => {
                    return Err(ScriptError::new(format!(
                        "line {}: unexpected character '{}'",
                        line, other
                    )))
                }
            };
            (single, 1)
        };
        tokens.push(Spanned { token, line });
        i += width;
    }

    Ok(tokens)
}
