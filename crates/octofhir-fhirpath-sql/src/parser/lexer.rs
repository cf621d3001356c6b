use crate::error::{Result, TranslationError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Plain identifier or keyword (`name`, `and`, `true`).
    Identifier(String),
    /// Backtick-delimited identifier; never a keyword.
    Delimited(String),
    /// `$this`, `%resource`, `%name`.
    Variable(String),
    String(String),
    Integer(String),
    Decimal(String),
    Date(String),
    DateTime(String),
    Time(String),
    /// Operator symbol (`=`, `!=`, `<=`, `&`, `|`, ...).
    Symbol(&'static str),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

/// A token and the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Split the whole input into tokens, ending with [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let position = self.position;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, position });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn error(&self, message: impl Into<String>) -> TranslationError {
        TranslationError::parse(self.position, message)
    }

    /// Skip whitespace and `//` / `/* */` comments.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.current_char(), self.peek_char(1)) {
                (Some(ch), _) if ch.is_whitespace() => self.advance(),
                (Some('/'), Some('/')) => {
                    while self.current_char().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.position += 2;
                    loop {
                        match (self.current_char(), self.peek_char(1)) {
                            (Some('*'), Some('/')) => {
                                self.position += 2;
                                break;
                            }
                            (Some(_), _) => self.advance(),
                            (None, _) => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    /// Read a quoted string or delimited identifier, resolving escapes.
    fn read_quoted(&mut self, quote: char) -> Result<String> {
        let mut result = String::new();
        self.advance();

        while let Some(ch) = self.current_char() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    self.advance();
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('f') => result.push('\u{c}'),
                        Some('u') => {
                            let hex: String = (1..=4).filter_map(|i| self.peek_char(i)).collect();
                            let code = u32::from_str_radix(&hex, 16)
                                .ok()
                                .filter(|_| hex.len() == 4)
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            result.push(code);
                            self.position += 4;
                        }
                        Some(c @ ('\'' | '"' | '`' | '\\' | '/')) => result.push(c),
                        Some(c) => return Err(self.error(format!("invalid escape sequence \\{c}"))),
                        None => break,
                    }
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(self.error("unterminated string"))
    }

    fn read_number(&mut self) -> Token {
        let mut number = String::new();
        let mut is_decimal = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_decimal
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_decimal = true;
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_decimal {
            Token::Decimal(number)
        } else {
            Token::Integer(number)
        }
    }

    /// `@2020-01-01`, `@2020-01-01T10:00:00Z`, `@T10:00`.
    fn read_temporal(&mut self) -> Result<Token> {
        self.advance();
        let time_only = self.current_char() == Some('T');
        if time_only {
            self.advance();
        }
        let mut value = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | ':' | '.' | '+') {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if value.is_empty() {
            return Err(self.error("empty date/time literal"));
        }
        Ok(if time_only {
            Token::Time(value)
        } else if value.contains('T') {
            Token::DateTime(value)
        } else {
            Token::Date(value)
        })
    }

    fn symbol(&mut self, symbol: &'static str) -> Token {
        self.position += symbol.chars().count();
        Token::Symbol(symbol)
    }

    fn next_token(&mut self) -> Result<Token> {
        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };
        let next = self.peek_char(1);

        let token = match ch {
            '.' => {
                self.advance();
                Token::Dot
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            '(' => {
                self.advance();
                Token::LParen
            }
            ')' => {
                self.advance();
                Token::RParen
            }
            '[' => {
                self.advance();
                Token::LBracket
            }
            ']' => {
                self.advance();
                Token::RBracket
            }
            '{' => {
                self.advance();
                Token::LBrace
            }
            '}' => {
                self.advance();
                Token::RBrace
            }
            '\'' => Token::String(self.read_quoted('\'')?),
            '`' => Token::Delimited(self.read_quoted('`')?),
            '@' => self.read_temporal()?,
            '$' | '%' => {
                let prefix = ch;
                self.advance();
                let name = match self.current_char() {
                    Some('`') => self.read_quoted('`')?,
                    Some('\'') => self.read_quoted('\'')?,
                    _ => self.read_identifier(),
                };
                if name.is_empty() {
                    return Err(self.error(format!("expected a name after '{prefix}'")));
                }
                Token::Variable(format!("{prefix}{name}"))
            }
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Token::Identifier(self.read_identifier()),
            '!' if next == Some('=') => self.symbol("!="),
            '!' if next == Some('~') => self.symbol("!~"),
            '<' if next == Some('=') => self.symbol("<="),
            '>' if next == Some('=') => self.symbol(">="),
            '=' => self.symbol("="),
            '~' => self.symbol("~"),
            '<' => self.symbol("<"),
            '>' => self.symbol(">"),
            '+' => self.symbol("+"),
            '-' => self.symbol("-"),
            '*' => self.symbol("*"),
            '/' => self.symbol("/"),
            '&' => self.symbol("&"),
            '|' => self.symbol("|"),
            other => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        Ok(token)
    }
}
