use crate::error::{Span, SyntaxError};

/// Token types for candidate programs (a Pandas-flavoured Python subset).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    StringLit(String),

    Ident(String),

    // Keywords
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
    Import,
    From,
    As,
    Pass,
    /// Recognised but unsupported statement keywords (def, for, while, …).
    Reserved(String),

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    AugAssign(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Dot,
    At,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Newline,

    // Special
    Eof,
}

/// A token with the location of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

const RESERVED: &[&str] = &[
    "def", "class", "for", "while", "with", "lambda", "return", "yield", "global",
    "nonlocal", "del", "try", "except", "finally", "raise", "assert", "async",
    "await", "elif", "break", "continue",
];

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    depth: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            depth: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens: Vec<Spanned> = Vec::new();

        loop {
            self.skip_blanks()?;
            let span = Span::new(self.line, self.col);
            let Some(ch) = self.peek() else {
                if !matches!(tokens.last().map(|t| &t.token), Some(Token::Newline) | None) {
                    tokens.push(Spanned { token: Token::Newline, span });
                }
                tokens.push(Spanned { token: Token::Eof, span });
                break;
            };

            let token = match ch {
                '\n' => {
                    self.bump();
                    // Newlines inside brackets are implicit line joins; runs of
                    // blank lines collapse into one terminator.
                    if self.depth > 0
                        || matches!(tokens.last().map(|t| &t.token), Some(Token::Newline) | None)
                    {
                        continue;
                    }
                    Token::Newline
                }
                '(' => { self.bump(); self.depth += 1; Token::LParen }
                '[' => { self.bump(); self.depth += 1; Token::LBracket }
                '{' => { self.bump(); self.depth += 1; Token::LBrace }
                ')' => { self.bump(); self.depth = self.depth.saturating_sub(1); Token::RParen }
                ']' => { self.bump(); self.depth = self.depth.saturating_sub(1); Token::RBracket }
                '}' => { self.bump(); self.depth = self.depth.saturating_sub(1); Token::RBrace }
                ',' => { self.bump(); Token::Comma }
                ':' => { self.bump(); Token::Colon }
                ';' => { self.bump(); Token::Semicolon }
                '.' if !self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => { self.bump(); Token::Dot }
                '~' => { self.bump(); Token::Tilde }
                '^' => { self.bump(); self.aug_or("^", Token::Caret) }
                '@' => { self.bump(); Token::At }
                '&' => { self.bump(); self.aug_or("&", Token::Amp) }
                '|' => { self.bump(); self.aug_or("|", Token::Pipe) }
                '+' => { self.bump(); self.aug_or("+", Token::Plus) }
                '-' => { self.bump(); self.aug_or("-", Token::Minus) }
                '%' => { self.bump(); self.aug_or("%", Token::Percent) }
                '*' => {
                    self.bump();
                    if self.peek() == Some('*') {
                        self.bump();
                        self.aug_or("**", Token::DoubleStar)
                    } else {
                        self.aug_or("*", Token::Star)
                    }
                }
                '/' => {
                    self.bump();
                    if self.peek() == Some('/') {
                        self.bump();
                        self.aug_or("//", Token::DoubleSlash)
                    } else {
                        self.aug_or("/", Token::Slash)
                    }
                }
                '=' => {
                    self.bump();
                    if self.peek() == Some('=') { self.bump(); Token::Eq } else { Token::Assign }
                }
                '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::Ne
                    } else {
                        return Err(SyntaxError::new(span, "unexpected character '!'"));
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('=') { self.bump(); Token::Le } else { Token::Lt }
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') { self.bump(); Token::Ge } else { Token::Gt }
                }
                '"' | '\'' => self.read_string(false)?,
                c if c.is_ascii_digit() || c == '.' => self.read_number()?,
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.read_word();
                    let prefix = word.to_ascii_lowercase();
                    if matches!(self.peek(), Some('"' | '\''))
                        && matches!(prefix.as_str(), "r" | "f" | "b" | "rb" | "br" | "fr" | "rf" | "u")
                    {
                        if prefix.contains('f') {
                            return Err(SyntaxError::new(span, "f-strings are not supported"));
                        }
                        if prefix.contains('b') {
                            return Err(SyntaxError::new(span, "byte strings are not supported"));
                        }
                        self.read_string(prefix.contains('r'))?
                    } else {
                        keyword_or_ident(word)
                    }
                }
                other => {
                    return Err(SyntaxError::new(span, format!("unexpected character '{}'", other)));
                }
            };
            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// `op=` becomes an augmented assignment; otherwise return `plain`.
    fn aug_or(&mut self, op: &str, plain: Token) -> Token {
        if self.peek() == Some('=') {
            self.bump();
            Token::AugAssign(op.to_string())
        } else {
            plain
        }
    }

    /// Skip spaces, tabs, carriage returns, comments and `\` continuations.
    fn skip_blanks(&mut self) -> Result<(), SyntaxError> {
        while let Some(ch) = self.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\\' => {
                    let span = Span::new(self.line, self.col);
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(SyntaxError::new(span, "unexpected character after line continuation"));
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let span = Span::new(self.line, self.col);
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_at(1)
                    .is_some_and(|n| n.is_ascii_digit() || ((n == '-' || n == '+') && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                text.push(c);
                self.bump();
                if let Some(sign @ ('-' | '+')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| SyntaxError::new(span, format!("invalid number literal '{}'", text)))
    }

    fn read_string(&mut self, raw: bool) -> Result<Token, SyntaxError> {
        let span = Span::new(self.line, self.col);
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut s = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(SyntaxError::new(span, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                s.push(c);
                continue;
            }
            if c == '\n' && !triple {
                return Err(SyntaxError::new(span, "unterminated string literal"));
            }
            if c == '\\' {
                let Some(next) = self.bump() else {
                    return Err(SyntaxError::new(span, "unterminated string literal"));
                };
                if raw {
                    s.push('\\');
                    s.push(next);
                    continue;
                }
                match next {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '0' => s.push('\0'),
                    '\\' => s.push('\\'),
                    '\'' => s.push('\''),
                    '"' => s.push('"'),
                    '\n' => {}
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
                continue;
            }
            s.push(c);
        }
        Ok(Token::StringLit(s))
    }
}

fn keyword_or_ident(word: String) -> Token {
    match word.as_str() {
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "is" => Token::Is,
        "if" => Token::If,
        "else" => Token::Else,
        "import" => Token::Import,
        "from" => Token::From,
        "as" => Token::As,
        "pass" => Token::Pass,
        w if RESERVED.contains(&w) => Token::Reserved(word),
        _ => Token::Ident(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn assignment_with_subscript() {
        assert_eq!(
            kinds("x = df['Sales']"),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Ident("df".into()),
                Token::LBracket,
                Token::StringLit("Sales".into()),
                Token::RBracket,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let toks = kinds("f(1,\n  2)\n\n\ny");
        let newlines = toks.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a // b ** 2 != c"),
            vec![
                Token::Ident("a".into()),
                Token::DoubleSlash,
                Token::Ident("b".into()),
                Token::DoubleStar,
                Token::Number(2.0),
                Token::Ne,
                Token::Ident("c".into()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000 .5 2e3")[..3], [Token::Number(1000.0), Token::Number(0.5), Token::Number(2000.0)]);
    }

    #[test]
    fn string_escapes_and_raw_strings() {
        assert_eq!(kinds(r#""a\"b""#)[0], Token::StringLit("a\"b".into()));
        assert_eq!(kinds(r"r'\d+'")[0], Token::StringLit(r"\d+".into()));
        assert_eq!(kinds("'''x\ny'''")[0], Token::StringLit("x\ny".into()));
    }

    #[test]
    fn comments_and_continuations() {
        let toks = kinds("a = 1 + \\\n 2  # total\n");
        assert!(toks.contains(&Token::Number(2.0)));
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 1);
    }

    #[test]
    fn keywords() {
        assert_eq!(kinds("import pandas as pd")[..4], [
            Token::Import,
            Token::Ident("pandas".into()),
            Token::As,
            Token::Ident("pd".into()),
        ]);
        assert_eq!(kinds("def")[0], Token::Reserved("def".into()));
    }

    #[test]
    fn fstrings_are_rejected() {
        let err = Lexer::new("x = f'{a}'").tokenize().unwrap_err();
        assert!(err.message.contains("f-strings"));
    }

    #[test]
    fn spans_track_lines() {
        let toks = Lexer::new("a\n  b").tokenize().unwrap();
        let b = toks.iter().find(|t| t.token == Token::Ident("b".into())).unwrap();
        assert_eq!(b.span, Span::new(2, 3));
    }

    #[test]
    fn unterminated_string() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }
}
