//! Hand-written character-cursor lexer.
//!
//! Backtick template bodies are pre-split here into literal-text and raw
//! interpolation-source parts; the parser turns the raw parts into
//! expressions. Interpolations are tracked by brace depth so nested object
//! literals inside `${ … }` lex correctly.

use crate::token::{RawTemplatePart, Token, TokenKind};
use crate::SyntaxError;

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lexer = Lexer { src, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_trivia()?;
        let start = lexer.pos;
        let Some(ch) = lexer.peek() else {
            break;
        };
        let kind = match ch {
            '\'' | '"' => TokenKind::Str(lexer.lex_quoted(ch)?),
            '`' => TokenKind::Template(lexer.lex_template()?),
            c if c.is_ascii_digit() => lexer.lex_number()?,
            c if is_ident_start(c) => lexer.lex_ident(),
            _ => lexer.lex_operator()?,
        };
        tokens.push(Token::new(kind, start));
    }
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> SyntaxError {
        SyntaxError::new(message, self.src, offset)
    }

    /// Skip whitespace, `//` line comments and `/* … */` block comments.
    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let start = self.pos;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment", start)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "mod" => TokenKind::Mod,
            name => TokenKind::Ident(name.to_string()),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, SyntaxError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        // a dot only starts a fraction when a digit follows, so `a[0].b`
        // keeps its member access
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek2(), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            let n: f64 = text
                .parse()
                .map_err(|_| self.error("malformed number", start))?;
            Ok(TokenKind::Float(n))
        } else {
            let n: i64 = text
                .parse()
                .map_err(|_| self.error("integer literal too large", start))?;
            Ok(TokenKind::Int(n))
        }
    }

    /// Lex a single- or double-quoted string, processing escapes. A trailing
    /// escaped backslash (`'c:\\'`) must not terminate the literal early.
    fn lex_quoted(&mut self, quote: char) -> Result<String, SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some(c) => text.push(c),
                    None => return Err(self.error("unterminated string literal", start)),
                },
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated string literal", start)),
            }
        }
    }

    /// Lex a backtick template body into raw parts. `${ … }` interpolations
    /// are scanned with balanced-brace tracking; quoted strings inside an
    /// interpolation are skipped so braces in string content don't count.
    fn lex_template(&mut self) -> Result<Vec<RawTemplatePart>, SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => {
                    if !text.is_empty() {
                        parts.push(RawTemplatePart::Text(text));
                    }
                    return Ok(parts);
                }
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some(c) => text.push(c),
                    None => return Err(self.error("unterminated template literal", start)),
                },
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(RawTemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let expr_start = self.pos;
                    let mut depth = 1usize;
                    loop {
                        match self.bump() {
                            Some('{') => depth += 1,
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(q @ ('\'' | '"' | '`')) => self.skip_quoted_raw(q, start)?,
                            Some(_) => {}
                            None => {
                                return Err(self.error("unterminated interpolation", expr_start))
                            }
                        }
                    }
                    let inner = self.src[expr_start..self.pos - 1].trim();
                    parts.push(RawTemplatePart::Expr(inner.to_string()));
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated template literal", start)),
            }
        }
    }

    /// Skip over a quoted string encountered while brace-scanning an
    /// interpolation, without interpreting escapes beyond pairing them.
    fn skip_quoted_raw(&mut self, quote: char, err_offset: usize) -> Result<(), SyntaxError> {
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(()),
                Some('\\') => {
                    self.bump();
                }
                Some(_) => {}
                None => return Err(self.error("unterminated string literal", err_offset)),
            }
        }
    }

    fn lex_operator(&mut self) -> Result<TokenKind, SyntaxError> {
        let start = self.pos;
        let ch = self.bump().expect("caller checked peek");
        // longest match first: two-char operators
        let kind = match (ch, self.peek()) {
            ('=', Some('=')) => {
                self.bump();
                TokenKind::EqEq
            }
            ('=', Some('>')) => {
                self.bump();
                TokenKind::FatArrow
            }
            ('!', Some('=')) => {
                self.bump();
                TokenKind::NotEq
            }
            ('<', Some('=')) => {
                self.bump();
                TokenKind::LtEq
            }
            ('>', Some('=')) => {
                self.bump();
                TokenKind::GtEq
            }
            ('&', Some('&')) => {
                self.bump();
                TokenKind::AmpAmp
            }
            ('|', Some('|')) => {
                self.bump();
                TokenKind::PipePipe
            }
            ('|', Some('>')) => {
                self.bump();
                TokenKind::PipeGt
            }
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('!', _) => TokenKind::Bang,
            ('&', _) => TokenKind::Amp,
            ('|', _) => TokenKind::Pipe,
            ('^', _) => TokenKind::Caret,
            ('~', _) => TokenKind::Tilde,
            ('=', _) => TokenKind::Assign,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            (',', _) => TokenKind::Comma,
            (':', _) => TokenKind::Colon,
            ('?', _) => TokenKind::Question,
            ('.', _) => TokenKind::Dot,
            (c, _) => return Err(self.error(format!("unexpected character '{c}'"), start)),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{RawTemplatePart, TokenKind};
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(
            kinds("== != <= >= && || |> => < > | &"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::PipeGt,
                TokenKind::FatArrow,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Pipe,
                TokenKind::Amp,
            ]
        );
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("true false null and or mod anderson"),
            vec![
                TokenKind::True,
                TokenKind::False,
                TokenKind::Null,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Mod,
                TokenKind::Ident("anderson".into()),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1 2.5 10"),
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Int(10)
            ]
        );
    }

    #[test]
    fn index_dot_member_is_not_a_float() {
        assert_eq!(
            kinds("a[0].b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::LBracket,
                TokenKind::Int(0),
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds("'a\\'b'"), vec![TokenKind::Str("a'b".into())]);
        assert_eq!(kinds("\"a\\\"b\""), vec![TokenKind::Str("a\"b".into())]);
    }

    #[test]
    fn windows_path_trailing_backslash() {
        // the escaped backslash must not swallow the closing quote
        assert_eq!(
            kinds("'C:\\\\dir\\\\'"),
            vec![TokenKind::Str("C:\\dir\\".into())]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("'abc\\'").is_err());
    }

    #[test]
    fn template_with_nested_braces() {
        assert_eq!(
            kinds("`a ${ {b: 1} } c`"),
            vec![TokenKind::Template(vec![
                RawTemplatePart::Text("a ".into()),
                RawTemplatePart::Expr("{b: 1}".into()),
                RawTemplatePart::Text(" c".into()),
            ])]
        );
    }

    #[test]
    fn template_interpolation_ignores_braces_in_strings() {
        assert_eq!(
            kinds("`${ join(xs, '}') }`"),
            vec![TokenKind::Template(vec![RawTemplatePart::Expr(
                "join(xs, '}')".into()
            )])]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n + /* block */ 2"),
            vec![TokenKind::Int(1), TokenKind::Plus, TokenKind::Int(2)]
        );
    }

    #[test]
    fn offsets_point_at_token_starts() {
        let tokens = tokenize("ab + 1").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.offset).collect::<Vec<_>>(),
            vec![0, 3, 5]
        );
    }
}
