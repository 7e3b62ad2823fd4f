//! Line-based tokenizer for the assembly text format.

/// Token kinds. Invalid kinds are still returned so the assembler can point at them.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Decimal or `0x` hexadecimal integer. Range checks happen in the assembler.
    Int(i64),
    /// Also `inf`, `-inf`, `nan` and `nan(0x<bits>)`.
    Float(f32),
    InvalidNumber,
    /// `r<n>`.
    Register(u32),
    /// `<n>:`.
    Label(u32),
    CodeSection,
    DataSection,
    StringSection,
    InvalidSection,
    /// A quoted string. `segment` is the same text read as string segment content, where the
    /// `\n` escape stands for `<cr>`.
    Str { value: String, segment: String },
    /// A string missing its closing quote, with the value read so far.
    UnterminatedStr(String),
    Ident(String),
    InvalidIdent,
    ArgSeparator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based column, counted in characters.
    pub col: usize,
    pub len: usize,
}

/// Split one line into tokens. Everything after `//` is ignored.
pub fn tokenize_line(line: &str) -> Vec<Token> {
    let mut lexer = Lexer {
        chars: line.chars().collect(),
        pos: 0,
    };
    let mut tokens = Vec::new();

    while let Some(c) = lexer.peek() {
        if c == '/' && lexer.peek_at(1) == Some('/') {
            break;
        }
        let start = lexer.pos;
        let kind = match c {
            c if c.is_whitespace() => {
                lexer.pos += 1;
                continue;
            }
            '-' if lexer.peek_at(1).is_some_and(|c| c.is_ascii_alphabetic()) => lexer.ident(),
            '-' | '0'..='9' => lexer.number_or_label(),
            ',' => {
                lexer.pos += 1;
                TokenKind::ArgSeparator
            }
            '.' => lexer.section(),
            '"' => lexer.string(),
            'r' if lexer.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => lexer.register(),
            _ => lexer.ident(),
        };
        tokens.push(Token {
            kind,
            col: start + 1,
            len: lexer.pos - start,
        });
    }

    tokens
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn text(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn number_or_label(&mut self) -> TokenKind {
        let start = self.pos;
        self.pos += 1;
        let mut is_float = false;
        let mut is_hex = false;
        let mut has_exponent = false;
        let mut is_label = false;

        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                'x' if self.pos - start == 1 && self.chars[start] == '0' => {
                    is_hex = true;
                }
                'a'..='f' | 'A'..='F' if is_hex => {}
                '.' if !is_float && !is_hex => is_float = true,
                'e' if !has_exponent && !is_hex => {
                    is_float = true;
                    has_exponent = true;
                    if self.peek_at(1) == Some('-') {
                        self.pos += 1;
                    }
                }
                ':' if !is_float && !is_hex => {
                    is_label = true;
                    break;
                }
                _ => break,
            }
            self.pos += 1;
        }

        let text = self.text(start);
        let kind = if is_label {
            text.parse().map(TokenKind::Label).ok()
        } else if is_float {
            text.parse().map(TokenKind::Float).ok()
        } else if is_hex {
            i64::from_str_radix(&text[2..], 16).map(TokenKind::Int).ok()
        } else {
            text.parse().map(TokenKind::Int).ok()
        };

        if is_label {
            // The colon.
            self.pos += 1;
        }
        kind.unwrap_or(TokenKind::InvalidNumber)
    }

    fn register(&mut self) -> TokenKind {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        TokenKind::Register(self.text(start).parse().unwrap_or(u32::MAX))
    }

    fn section(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(|c| !c.is_whitespace()) {
            self.pos += 1;
        }
        match self.text(start).as_str() {
            ".code" => TokenKind::CodeSection,
            ".data" => TokenKind::DataSection,
            ".string" => TokenKind::StringSection,
            _ => TokenKind::InvalidSection,
        }
    }

    fn string(&mut self) -> TokenKind {
        // Opening quote.
        self.pos += 1;
        let mut value = String::new();
        let mut segment = String::new();

        while let Some(c) = self.next() {
            let c = match c {
                '"' => return TokenKind::Str { value, segment },
                '\\' => match self.next() {
                    Some('n') => {
                        value.push('\n');
                        segment.push_str("<cr>");
                        continue;
                    }
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('0') => '\0',
                    Some('u') if self.peek() == Some('{') => match self.unicode_escape() {
                        Some(c) => c,
                        None => {
                            value.push_str("\\u");
                            segment.push_str("\\u");
                            continue;
                        }
                    },
                    Some(c) => c,
                    None => '\\',
                },
                c => c,
            };
            value.push(c);
            segment.push(c);
        }

        TokenKind::UnterminatedStr(value)
    }

    /// `{XXXX}` after `\u`. Leaves the position untouched when malformed.
    fn unicode_escape(&mut self) -> Option<char> {
        let close = self.chars[self.pos..].iter().position(|&c| c == '}')?;
        let hex: String = self.chars[self.pos + 1..self.pos + close].iter().collect();
        let c = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)?;
        self.pos += close + 1;
        Some(c)
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' || (c == '/' && self.peek_at(1) == Some('/')) {
                break;
            }
            self.pos += 1;
        }

        let text = self.text(start);
        if let Some(value) = non_finite_float(&text) {
            return TokenKind::Float(value);
        }

        let mut chars = text.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '=' | '<' | '>' | '!')
            });

        if valid {
            TokenKind::Ident(text)
        } else {
            TokenKind::InvalidIdent
        }
    }
}

fn non_finite_float(text: &str) -> Option<f32> {
    match text {
        "inf" => Some(f32::INFINITY),
        "-inf" => Some(f32::NEG_INFINITY),
        "nan" => Some(f32::NAN),
        _ => {
            let hex = text.strip_prefix("nan(0x")?.strip_suffix(')')?;
            let value = f32::from_bits(u32::from_str_radix(hex, 16).ok()?);
            value.is_nan().then_some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<TokenKind> {
        tokenize_line(line).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn exponent_floats() {
        assert_eq!(kinds("1e30"), [TokenKind::Float(1e30)]);
        assert_eq!(kinds("-2.5e-3"), [TokenKind::Float(-2.5e-3)]);
        // 'e' is a digit in hex literals
        assert_eq!(kinds("0x1e"), [TokenKind::Int(0x1e)]);
    }

    #[test]
    fn unicode_escapes() {
        assert_eq!(
            kinds(r#""a\u{0001}b\u{zz}""#),
            [TokenKind::Str {
                value: "a\u{1}b\\u{zz}".to_string(),
                segment: "a\u{1}b\\u{zz}".to_string(),
            }]
        );
    }

    #[test]
    fn newline_escape_is_a_carriage_return_in_segments() {
        assert_eq!(
            kinds(r#""a\nb\u{000a}c""#),
            [TokenKind::Str {
                value: "a\nb\nc".to_string(),
                segment: "a<cr>b\nc".to_string(),
            }]
        );
    }

    fn float_bits(line: &str) -> Vec<u32> {
        kinds(line)
            .into_iter()
            .filter_map(|kind| match kind {
                TokenKind::Float(v) => Some(v.to_bits()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn non_finite_floats() {
        assert_eq!(
            float_bits("inf, -inf, nan, nan(0xffc00001)"),
            [
                f32::INFINITY.to_bits(),
                f32::NEG_INFINITY.to_bits(),
                f32::NAN.to_bits(),
                0xffc0_0001
            ]
        );
        // Bit patterns that aren't NaN aren't accepted in the payload form.
        assert_eq!(kinds("nan(0x3f800000)"), [TokenKind::InvalidIdent]);
    }
}
