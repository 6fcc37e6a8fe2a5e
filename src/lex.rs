use std::fmt::Display;

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected character '{token}' in numbered picker header")]
#[diagnostic(
    code(spintax::syntax),
    help("a numbered picker starts with `{{:N:` where N is a decimal count")
)]
pub struct SyntaxError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

impl SyntaxError {
    /// Byte offset of the offending character.
    pub fn offset(&self) -> usize {
        self.bad_bit.offset()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.offset..self.offset + self.literal.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal run, or a symbol name inside `[...]`. Escapes are kept raw.
    Text,
    LeftBrace,
    NumberedBrace,
    Count,
    HeaderEnd,
    LeftBracket,
    RightBracket,
    Pipe,
    RightBrace,
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::Text => write!(f, "TEXT {lit}"),
            TokenKind::LeftBrace => write!(f, "LEFT_BRACE {lit}"),
            TokenKind::NumberedBrace => write!(f, "NUMBERED_BRACE {lit}"),
            TokenKind::Count => write!(f, "COUNT {lit}"),
            TokenKind::HeaderEnd => write!(f, "HEADER_END {lit}"),
            TokenKind::LeftBracket => write!(f, "LEFT_BRACKET {lit}"),
            TokenKind::RightBracket => write!(f, "RIGHT_BRACKET {lit}"),
            TokenKind::Pipe => write!(f, "PIPE {lit}"),
            TokenKind::RightBrace => write!(f, "RIGHT_BRACE {lit}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    AfterOpenBrace,
    NumberedHeader,
    Variable,
}

pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
    state: State,
    peeked: Option<Result<Token<'de>, Error>>,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            filename,
            whole: input,
            rest: input,
            byte: 0,
            state: State::Text,
            peeked: None,
        }
    }

    pub fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<template>"), self.whole.to_string())
    }

    /// Look at the next token without consuming it. A lexing error is
    /// handed out here and not kept for a later `next`.
    pub fn peek(&mut self) -> Result<Option<Token<'de>>, Error> {
        if self.peeked.is_none() {
            self.peeked = self.next();
        }
        match self.peeked.take() {
            Some(Ok(token)) => {
                self.peeked = Some(Ok(token));
                Ok(Some(token))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let mut chars = self.rest.chars();
        let c = chars.next()?;
        self.rest = chars.as_str();
        self.byte += c.len_utf8();
        Some(c)
    }

    /// Consume a run of characters up to (not including) the first unescaped
    /// character matching `stop`. An escape swallows the character after it.
    fn scan_run(&mut self, stop: impl Fn(char) -> bool) {
        while let Some(c) = self.rest.chars().next() {
            if c == '\\' {
                self.bump();
                self.bump();
                continue;
            }
            if stop(c) {
                break;
            }
            self.bump();
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token<'de> {
        let literal = &self.whole[start..self.byte];
        tracing::trace!(?kind, literal, offset = start, "token");
        Token {
            kind,
            literal,
            offset: start,
        }
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            return Some(peeked);
        }
        loop {
            let start = self.byte;
            match self.state {
                State::Text => {
                    let kind = match self.rest.chars().next()? {
                        '{' => {
                            self.bump();
                            self.state = State::AfterOpenBrace;
                            continue;
                        }
                        '[' => {
                            self.bump();
                            self.state = State::Variable;
                            TokenKind::LeftBracket
                        }
                        '|' => {
                            self.bump();
                            TokenKind::Pipe
                        }
                        '}' => {
                            self.bump();
                            TokenKind::RightBrace
                        }
                        _ => {
                            self.scan_run(|c| matches!(c, '{' | '[' | '|' | '}'));
                            TokenKind::Text
                        }
                    };
                    return Some(Ok(self.token(kind, start)));
                }
                State::AfterOpenBrace => {
                    // the brace itself was consumed on the way in
                    let start = start - 1;
                    if self.rest.starts_with(':') {
                        self.bump();
                        self.state = State::NumberedHeader;
                        return Some(Ok(self.token(TokenKind::NumberedBrace, start)));
                    }
                    self.state = State::Text;
                    return Some(Ok(self.token(TokenKind::LeftBrace, start)));
                }
                State::NumberedHeader => {
                    let kind = match self.rest.chars().next()? {
                        ':' => {
                            self.bump();
                            self.state = State::Text;
                            TokenKind::HeaderEnd
                        }
                        '0'..='9' => {
                            while self.rest.starts_with(|c: char| c.is_ascii_digit()) {
                                self.bump();
                            }
                            TokenKind::Count
                        }
                        c => {
                            self.bump();
                            return Some(Err(SyntaxError {
                                src: self.source(),
                                bad_bit: SourceSpan::from(start..self.byte),
                                token: c,
                            }
                            .into()));
                        }
                    };
                    return Some(Ok(self.token(kind, start)));
                }
                State::Variable => {
                    let kind = match self.rest.chars().next()? {
                        ']' => {
                            self.bump();
                            self.state = State::Text;
                            TokenKind::RightBracket
                        }
                        _ => {
                            self.scan_run(|c| c == ']');
                            TokenKind::Text
                        }
                    };
                    return Some(Ok(self.token(kind, start)));
                }
            }
        }
    }
}

/// Tokenize a whole template, stopping at the first error.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, Error> {
    Lexer::new(None, input).collect()
}
