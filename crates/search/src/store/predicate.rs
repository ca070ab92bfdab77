//! Filter evaluation for the in-process index
//!
//! Understands the subset of OData the rest of the crate writes:
//! `and`, `or`, `not`, parentheses, `groups/any()`,
//! `groups/any(g: search.in(g, '<list>', '<delims>'))` and
//! `<field> eq|ne '<literal>'` over `category`, `sourcefile`, `sourcepage`.

use lexforge_common::Fragment;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PredicateError {
    #[error("unexpected end of filter")]
    UnexpectedEnd,

    #[error("unexpected token '{0}'")]
    Unexpected(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unsupported field '{0}'")]
    UnsupportedField(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Colon,
    Str(String),
    Word(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Colon => ":".into(),
            Token::Str(s) => format!("'{}'", s),
            Token::Word(w) => w.clone(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        None => return Err(PredicateError::UnterminatedString),
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            literal.push('\'');
                        }
                        Some('\'') => break,
                        Some(other) => literal.push(other),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(PredicateError::Unexpected(other.to_string())),
        }
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '/' | '.' | '_')
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Category,
    SourceFile,
    SourcePage,
}

impl Field {
    fn parse(name: &str) -> Result<Self, PredicateError> {
        match name.to_ascii_lowercase().as_str() {
            "category" => Ok(Field::Category),
            "sourcefile" => Ok(Field::SourceFile),
            "sourcepage" => Ok(Field::SourcePage),
            _ => Err(PredicateError::UnsupportedField(name.to_string())),
        }
    }

    fn value<'a>(&self, fragment: &'a Fragment) -> Option<&'a str> {
        match self {
            Field::Category => fragment.category.as_deref(),
            Field::SourceFile => fragment.source_file.as_deref(),
            Field::SourcePage => fragment.source_page.as_deref(),
        }
    }
}

/// Parsed filter
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// `groups/any()`
    AnyGroup,
    /// `groups/any(g: search.in(g, ...))`
    GroupIn(Vec<String>),
    Compare { field: Field, equal: bool, value: String },
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.or_expr()?;
        match parser.peek() {
            None => Ok(predicate),
            Some(token) => Err(PredicateError::Unexpected(token.describe())),
        }
    }

    pub fn matches(&self, fragment: &Fragment) -> bool {
        match self {
            Predicate::And(a, b) => a.matches(fragment) && b.matches(fragment),
            Predicate::Or(a, b) => a.matches(fragment) || b.matches(fragment),
            Predicate::Not(inner) => !inner.matches(fragment),
            Predicate::AnyGroup => !fragment.groups.is_empty(),
            Predicate::GroupIn(allowed) => fragment.groups.iter().any(|g| allowed.contains(g)),
            Predicate::Compare { field, equal, value } => {
                let same = field.value(fragment) == Some(value.as_str());
                same == *equal
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, PredicateError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(PredicateError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), PredicateError> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(PredicateError::Unexpected(token.describe()))
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn or_expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut left = self.unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Predicate, PredicateError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Predicate, PredicateError> {
        let word = match self.next()? {
            Token::Word(w) => w,
            other => return Err(PredicateError::Unexpected(other.describe())),
        };

        if word.eq_ignore_ascii_case("groups/any") {
            return self.group_any();
        }

        let field = Field::parse(&word)?;
        let equal = match self.next()? {
            Token::Word(op) if op.eq_ignore_ascii_case("eq") => true,
            Token::Word(op) if op.eq_ignore_ascii_case("ne") => false,
            other => return Err(PredicateError::Unexpected(other.describe())),
        };
        let value = match self.next()? {
            Token::Str(s) => s,
            other => return Err(PredicateError::Unexpected(other.describe())),
        };

        Ok(Predicate::Compare { field, equal, value })
    }

    /// After `groups/any`: either `()` or `(g: search.in(g, '...'[, '...']))`
    fn group_any(&mut self) -> Result<Predicate, PredicateError> {
        self.expect(Token::LParen)?;
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(Predicate::AnyGroup);
        }

        let var = match self.next()? {
            Token::Word(w) => w,
            other => return Err(PredicateError::Unexpected(other.describe())),
        };
        self.expect(Token::Colon)?;
        match self.next()? {
            Token::Word(w) if w.eq_ignore_ascii_case("search.in") => {}
            other => return Err(PredicateError::Unexpected(other.describe())),
        }
        self.expect(Token::LParen)?;
        self.expect(Token::Word(var))?;
        self.expect(Token::Comma)?;
        let list = match self.next()? {
            Token::Str(s) => s,
            other => return Err(PredicateError::Unexpected(other.describe())),
        };
        let delimiters = if self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            match self.next()? {
                Token::Str(s) => s,
                other => return Err(PredicateError::Unexpected(other.describe())),
            }
        } else {
            " ,".to_string()
        };
        self.expect(Token::RParen)?;
        self.expect(Token::RParen)?;

        let values = list
            .split(|c| delimiters.contains(c))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Predicate::GroupIn(values))
    }
}
