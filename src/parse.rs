use std::fmt::{self, Display};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    Lexer,
    lex::{Token, TokenKind},
};

/// Pickers nested deeper than this are rejected.
pub const MAX_NESTING: usize = 128;

#[derive(Error, Debug, Diagnostic)]
#[error("{kind}")]
#[diagnostic(code(spintax::parse))]
pub struct ParseError {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    span: SourceSpan,

    #[help]
    help: Option<String>,

    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn span(&self) -> SourceSpan {
        self.span
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("numbered picker is missing its count")]
    MissingCount,
    #[error("invalid picker count `{0}`")]
    InvalidCount(String),
    #[error("numbered picker header is missing its closing `:`")]
    UnterminatedHeader,
    #[error("malformed variable reference")]
    MalformedVariable,
    #[error("picker asks for {requested} alternatives but only {available} are given")]
    NotEnoughAlternatives { requested: u32, available: usize },
    #[error("unterminated picker")]
    UnterminatedPicker,
    #[error("unexpected `{0}`")]
    UnexpectedToken(String),
    #[error("pickers nested more than {limit} levels deep")]
    TooDeep { limit: usize },
}

impl ParseErrorKind {
    fn help(&self) -> Option<String> {
        match self {
            ParseErrorKind::MissingCount | ParseErrorKind::UnterminatedHeader => {
                Some("write a numbered picker as `{:N:a|b|c}`".to_string())
            }
            ParseErrorKind::InvalidCount(_) => {
                Some(format!("the count must fit in {} bits", u32::BITS))
            }
            ParseErrorKind::MalformedVariable => {
                Some("write a variable as `[name]` with a non-empty name".to_string())
            }
            ParseErrorKind::NotEnoughAlternatives { requested, .. } => Some(format!(
                "add alternatives separated by `|` or lower the count below {requested}"
            )),
            ParseErrorKind::UnterminatedPicker => Some("close the picker with `}`".to_string()),
            ParseErrorKind::UnexpectedToken(_) => {
                Some(r"escape literal `{`, `}`, `[` and `|` with `\`".to_string())
            }
            ParseErrorKind::TooDeep { .. } => {
                Some("move inner pickers into a symbol with `define`".to_string())
            }
        }
    }
}

/// A sequence of pieces concatenated when spun.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Literal(String),
    Nested(Node),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Picker(Picker),
    /// Late-bound: only the name is kept, resolved against the symbol table
    /// on every spin.
    Variable { symbol: String },
}

/// Alternation group. `count <= alternatives.len()` holds for every picker
/// the parser builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picker {
    pub(crate) count: u32,
    pub(crate) alternatives: Vec<Expression>,
}

impl Picker {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn alternatives(&self) -> &[Expression] {
        &self.alternatives
    }
}

pub struct Parser<'de> {
    whole: &'de str,
    lexer: Lexer<'de>,
    depth: usize,
}

impl<'de> Parser<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str) -> Self {
        Parser {
            whole,
            lexer: Lexer::new(filename, whole),
            depth: 0,
        }
    }

    /// Parse the whole template. Tokens left over after the top-level
    /// expression (a stray `}` or `|`) are an error.
    pub fn parse(mut self) -> Result<Expression, Error> {
        let expression = self.parse_expression()?;
        if let Some(token) = self.lexer.next().transpose()? {
            return Err(self.unexpected(token));
        }
        tracing::debug!(
            len = self.whole.len(),
            elements = expression.elements.len(),
            "parsed template"
        );
        Ok(expression)
    }

    /// Parse literals and nested spintax until `|`, `}` or the end of input.
    /// The delimiter is left for the enclosing picker.
    pub fn parse_expression(&mut self) -> Result<Expression, Error> {
        let mut elements = Vec::new();
        while let Some(token) = self.lexer.peek()? {
            match token.kind {
                TokenKind::Pipe | TokenKind::RightBrace => break,
                TokenKind::Text => {
                    self.lexer.next().transpose()?;
                    elements.push(Element::Literal(unescape(token.literal)));
                }
                TokenKind::LeftBrace | TokenKind::NumberedBrace | TokenKind::LeftBracket => {
                    elements.push(Element::Nested(self.parse_spintax()?));
                }
                TokenKind::Count | TokenKind::HeaderEnd | TokenKind::RightBracket => {
                    return Err(self.unexpected(token));
                }
            }
        }
        Ok(Expression { elements })
    }

    pub fn parse_spintax(&mut self) -> Result<Node, Error> {
        let Some(open) = self.lexer.next().transpose()? else {
            let end = SourceSpan::from(self.whole.len()..self.whole.len());
            return Err(self.error(ParseErrorKind::UnterminatedPicker, end));
        };

        let count = match open.kind {
            TokenKind::LeftBrace => 1,
            TokenKind::NumberedBrace => self.parse_count(&open)?,
            TokenKind::LeftBracket => return self.parse_variable(&open),
            _ => return Err(self.unexpected(open)),
        };

        if self.depth == MAX_NESTING {
            return Err(self.error(
                ParseErrorKind::TooDeep { limit: MAX_NESTING },
                open.span(),
            ));
        }
        self.depth += 1;

        let mut alternatives = Vec::new();
        let close = loop {
            alternatives.push(self.parse_expression()?);
            let Some(token) = self.lexer.next().transpose()? else {
                return Err(self.error(ParseErrorKind::UnterminatedPicker, open.span()));
            };
            match token.kind {
                TokenKind::Pipe => continue,
                TokenKind::RightBrace => break token,
                _ => return Err(self.unexpected(token)),
            }
        };
        self.depth -= 1;

        if count as usize > alternatives.len() {
            let span = SourceSpan::from(open.offset..close.offset + close.literal.len());
            return Err(self.error(
                ParseErrorKind::NotEnoughAlternatives {
                    requested: count,
                    available: alternatives.len(),
                },
                span,
            ));
        }

        Ok(Node::Picker(Picker {
            count,
            alternatives,
        }))
    }

    fn parse_count(&mut self, open: &Token<'de>) -> Result<u32, Error> {
        let digits = self.expect(TokenKind::Count, ParseErrorKind::MissingCount, open.span())?;
        self.expect(
            TokenKind::HeaderEnd,
            ParseErrorKind::UnterminatedHeader,
            digits.span(),
        )?;
        digits.literal.parse().map_err(|_| {
            self.error(
                ParseErrorKind::InvalidCount(digits.literal.to_string()),
                digits.span(),
            )
        })
    }

    fn parse_variable(&mut self, open: &Token<'de>) -> Result<Node, Error> {
        let name = self.expect(
            TokenKind::Text,
            ParseErrorKind::MalformedVariable,
            open.span(),
        )?;
        self.expect(
            TokenKind::RightBracket,
            ParseErrorKind::MalformedVariable,
            name.span(),
        )?;
        Ok(Node::Variable {
            symbol: unescape(name.literal),
        })
    }

    /// Consume the next token, which must be of kind `expected`. `anchor`
    /// labels the error when the input ends first.
    fn expect(
        &mut self,
        expected: TokenKind,
        kind: ParseErrorKind,
        anchor: SourceSpan,
    ) -> Result<Token<'de>, Error> {
        match self.lexer.next().transpose()? {
            Some(token) if token.kind == expected => Ok(token),
            Some(token) => Err(self.error(kind, token.span())),
            None => Err(self.error(kind, anchor)),
        }
    }

    fn unexpected(&self, token: Token<'de>) -> Error {
        self.error(
            ParseErrorKind::UnexpectedToken(token.literal.to_string()),
            token.span(),
        )
    }

    fn error(&self, kind: ParseErrorKind, span: SourceSpan) -> Error {
        ParseError {
            src: self.lexer.source(),
            span,
            help: kind.help(),
            kind,
        }
        .into()
    }
}

/// Drop the backslash of every escape. A lone trailing backslash stays.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn write_escaped(
    f: &mut fmt::Formatter<'_>,
    text: &str,
    special: impl Fn(char) -> bool,
) -> fmt::Result {
    for (i, c) in text.chars().enumerate() {
        // a leading `:` right after `{` would open a numbered header
        if c == '\\' || special(c) || (i == 0 && c == ':') {
            write!(f, "\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.elements {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Literal(text) => {
                write_escaped(f, text, |c| matches!(c, '{' | '}' | '[' | '|'))
            }
            Element::Nested(node) => write!(f, "{node}"),
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Picker(picker) => {
                match picker.count {
                    1 => write!(f, "{{")?,
                    n => write!(f, "{{:{n}:")?,
                }
                for (i, alternative) in picker.alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{alternative}")?;
                }
                write!(f, "}}")
            }
            Node::Variable { symbol } => {
                write!(f, "[")?;
                write_escaped(f, symbol, |c| c == ']')?;
                write!(f, "]")
            }
        }
    }
}
