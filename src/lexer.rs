//! Lexical analysis of one command line.
//!
//! The lexer understands a small shell-like micro-grammar: words separated by
//! whitespace, `'raw'` and `"cooked"` quoting, backslash escapes, and the
//! operators `|`, `&&` and `||`.

use thiserror::Error;

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Plain word: a command name or an argument.
    Word,
    /// The pipe operator, `|`.
    Pipe,
    /// Logical and, `&&`.
    And,
    /// Logical or, `||`.
    Or,
}

/// Represents a token resulting from lexical analysis.
///
/// Operator tokens are only produced for unquoted operator characters, so a
/// quoted `"|"` is a [`TokenKind::Word`] whose text happens to be `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn word(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TokenKind::Word,
        }
    }

    pub fn operator(kind: TokenKind) -> Self {
        let text = match kind {
            TokenKind::Pipe => "|",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::Word => "",
        };
        Self {
            text: text.to_string(),
            kind,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.kind != TokenKind::Word
    }
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// A closing quote was not found; carries the quote that was left open.
    #[error("unbalanced quote {0:?}")]
    UnbalancedQuote(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match ch {
                c if is_separator(c) => self.finish_word(&mut out),
                // Grouping is not supported; parentheses only split words.
                '(' | ')' => self.finish_word(&mut out),
                '|' | '&' => {
                    self.finish_word(&mut out);
                    if let Some(kind) = self.read_operator(ch) {
                        out.push(Token::operator(kind));
                    }
                }
                '\\' => {
                    self.state = LexingState::ReadingWord;
                    // A trailing backslash has nothing to escape and is dropped.
                    if let Some(next) = self.read_char() {
                        self.buffer.push(next);
                    }
                }
                '\'' => {
                    self.state = LexingState::ReadingWord;
                    self.copy_raw_string()?;
                }
                '"' => {
                    self.state = LexingState::ReadingWord;
                    self.copy_cooked_string()?;
                }
                c => {
                    self.state = LexingState::ReadingWord;
                    self.buffer.push(c);
                }
            }
        }

        self.finish_word(&mut out);
        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Greedily pairs `first` with an identical following character.
    ///
    /// A lone `|` is a pipe; a lone `&` is not an operator at all and only
    /// acts as a word boundary.
    fn read_operator(&mut self, first: char) -> Option<TokenKind> {
        let doubled = self.peek_char() == Some(first);
        if doubled {
            self.read_char();
        }
        match (first, doubled) {
            ('|', true) => Some(TokenKind::Or),
            ('|', false) => Some(TokenKind::Pipe),
            ('&', true) => Some(TokenKind::And),
            _ => None,
        }
    }

    /// Copies a `'...'` run verbatim, the opening quote already consumed.
    fn copy_raw_string(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.read_char() {
                None => return Err(SyntaxError::UnbalancedQuote('\'')),
                Some('\'') => return Ok(()),
                Some(c) => self.buffer.push(c),
            }
        }
    }

    /// Copies a `"..."` run, interpreting backslash escapes.
    fn copy_cooked_string(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.read_char() {
                None => return Err(SyntaxError::UnbalancedQuote('"')),
                Some('"') => return Ok(()),
                Some('\\') => match self.read_char() {
                    None => return Err(SyntaxError::UnbalancedQuote('"')),
                    Some(c) => self.buffer.push(unescape(c)),
                },
                Some(c) => self.buffer.push(c),
            }
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if self.state == LexingState::ReadingWord {
            out.push(Token::word(std::mem::take(&mut self.buffer)));
            self.state = LexingState::Start;
        }
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0c' | '\r' | '\x0b' | '\x08')
}

/// Maps the character after a backslash inside double quotes.
/// Unknown escapes yield the character itself, so `\\` and `\"` are literal.
fn unescape(c: char) -> char {
    match c {
        'a' => '\x07',
        'b' => '\x08',
        't' => '\t',
        'n' => '\n',
        'v' => '\x0b',
        'f' => '\x0c',
        'r' => '\r',
        other => other,
    }
}

/// The main entry point function to perform lexical analysis.
///
/// Returns an empty vector for an empty or all-whitespace line.
pub fn tokenize(line: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
