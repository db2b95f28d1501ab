//! Groups a token stream into pipeline ranges.
//!
//! A line is a sequence of *ranges* joined by `&&` / `||`; each range is a
//! sequence of *stages* joined by `|`. Every stage's command name is checked
//! while parsing, so a malformed line is rejected before anything runs.

use crate::lexer::{Token, TokenKind};
use thiserror::Error;

/// One command invocation inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    name: String,
    args: Vec<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Operator joining a range to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    And,
    Or,
}

/// Stages connected by `|`, executed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRange {
    stages: Vec<Stage>,
    boundary: Option<Boundary>,
}

impl PipelineRange {
    pub fn new(stages: Vec<Stage>, boundary: Option<Boundary>) -> Self {
        Self { stages, boundary }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The operator that preceded this range; `None` for the first one.
    pub fn boundary(&self) -> Option<Boundary> {
        self.boundary
    }
}

/// Errors that can occur while grouping tokens into ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing to parse; blank lines are filtered before parsing.
    #[error("empty command line")]
    EmptyInput,
    /// The first word of a stage is not a registered command.
    #[error("{0}: no such command")]
    UnknownCommand(String),
    /// An operator with no stage in front of it, e.g. `| cmd` or `a && | b`.
    #[error("expected a command before '{0}'")]
    MissingCommand(String),
    /// An operator was the last token of the line.
    #[error("expected a command after '{0}'")]
    TrailingOperator(String),
}

struct RangeBuilder<'a, F> {
    tokens: &'a [Token],
    pos: usize,
    known_command: F,
}

impl<'a, F: Fn(&str) -> bool> RangeBuilder<'a, F> {
    fn build_ranges(mut self) -> Result<Vec<PipelineRange>, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let mut ranges = Vec::new();
        let mut boundary = None;
        loop {
            let (stages, next) = self.parse_range()?;
            ranges.push(PipelineRange::new(stages, boundary));
            match next {
                Some(op) => boundary = Some(op),
                None => break,
            }
        }
        Ok(ranges)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a range: stage ('|' stage)*, stopping after `&&` / `||` or at the end.
    fn parse_range(&mut self) -> Result<(Vec<Stage>, Option<Boundary>), ParseError> {
        let mut stages = vec![self.parse_stage()?];

        loop {
            let Some(op) = self.consume() else {
                return Ok((stages, None));
            };
            if self.peek().is_none() {
                return Err(ParseError::TrailingOperator(op.text.clone()));
            }
            match op.kind {
                TokenKind::Pipe => stages.push(self.parse_stage()?),
                TokenKind::And => return Ok((stages, Some(Boundary::And))),
                TokenKind::Or => return Ok((stages, Some(Boundary::Or))),
                TokenKind::Word => unreachable!("parse_stage stops only at operators"),
            }
        }
    }

    /// Parse a stage: word+, validating the command name as soon as it is seen.
    fn parse_stage(&mut self) -> Result<Stage, ParseError> {
        let name = match self.peek() {
            Some(token) if !token.is_operator() => token.text.clone(),
            // Only an operator (or nothing) can stand where a command should.
            other => {
                let op = other.map(|t| t.text.clone()).unwrap_or_default();
                return Err(ParseError::MissingCommand(op));
            }
        };
        if !(self.known_command)(&name) {
            return Err(ParseError::UnknownCommand(name));
        }
        self.consume();

        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if token.is_operator() {
                break;
            }
            args.push(token.text.clone());
            self.consume();
        }
        Ok(Stage::new(name, args))
    }
}

/// Groups `tokens` into pipeline ranges.
///
/// `known_command` is consulted for the first word of every stage, in order,
/// and the first unknown name aborts parsing.
pub fn parse<F>(tokens: &[Token], known_command: F) -> Result<Vec<PipelineRange>, ParseError>
where
    F: Fn(&str) -> bool,
{
    let builder = RangeBuilder {
        tokens,
        pos: 0,
        known_command,
    };
    builder.build_ranges()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use std::cell::RefCell;

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|w| w.to_string()).collect()
    }

    fn argv(stage: &Stage) -> Vec<String> {
        let mut argv = vec![stage.name().to_string()];
        argv.extend_from_slice(stage.args());
        argv
    }

    fn only_echo(name: &str) -> bool {
        name == "echo"
    }

    #[test]
    fn test_single_range_with_two_stages() {
        let tokens = vec![
            Token::word("echo"),
            Token::word("a"),
            Token::operator(TokenKind::Pipe),
            Token::word("echo"),
            Token::word("b"),
        ];
        let ranges = parse(&tokens, only_echo).unwrap();

        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].boundary(), None);
        assert_eq!(ranges[0].stages().len(), 2);
        assert_eq!(argv(&ranges[0].stages()[0]), words(&["echo", "a"]));
        assert_eq!(argv(&ranges[0].stages()[1]), words(&["echo", "b"]));
        assert_eq!(ranges[0].stages()[1].name(), "echo");
        assert_eq!(ranges[0].stages()[1].args(), &words(&["b"])[..]);
    }

    #[test]
    fn test_unknown_command_stops_before_boundary() {
        let tokens = vec![
            Token::word("nosuch"),
            Token::operator(TokenKind::And),
            Token::word("echo"),
        ];
        let checked = RefCell::new(Vec::new());
        let result = parse(&tokens, |name| {
            checked.borrow_mut().push(name.to_string());
            name == "echo"
        });

        assert_eq!(result, Err(ParseError::UnknownCommand("nosuch".to_string())));
        assert_eq!(*checked.borrow(), words(&["nosuch"]));
    }

    #[test]
    fn test_trailing_operators_are_rejected() {
        for (line, op) in [("echo a &&", "&&"), ("echo a ||", "||"), ("echo a |", "|")] {
            let tokens = tokenize(line).unwrap();
            assert_eq!(
                parse(&tokens, only_echo),
                Err(ParseError::TrailingOperator(op.to_string())),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_dangling_operators_are_rejected() {
        for (line, op) in [("| echo", "|"), ("echo && | echo", "|"), ("echo | && echo", "&&")] {
            let tokens = tokenize(line).unwrap();
            assert_eq!(
                parse(&tokens, only_echo),
                Err(ParseError::MissingCommand(op.to_string())),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert_eq!(parse(&[], only_echo), Err(ParseError::EmptyInput));
    }

    #[test]
    fn test_ranges_carry_preceding_boundary() {
        let tokens = tokenize("echo 1 | echo 2 && echo 3 || echo 4 | echo 5").unwrap();
        let ranges = parse(&tokens, only_echo).unwrap();

        let shape: Vec<(Option<Boundary>, usize)> = ranges
            .iter()
            .map(|r| (r.boundary(), r.stages().len()))
            .collect();
        assert_eq!(
            shape,
            vec![(None, 2), (Some(Boundary::And), 1), (Some(Boundary::Or), 2)]
        );
        assert_eq!(argv(&ranges[2].stages()[1]), words(&["echo", "5"]));
    }

    #[test]
    fn test_command_name_checked_per_stage() {
        let tokens = tokenize("echo a | cat").unwrap();
        assert_eq!(
            parse(&tokens, only_echo),
            Err(ParseError::UnknownCommand("cat".to_string()))
        );
    }

    #[test]
    fn test_quoted_operator_is_an_argument() {
        let tokens = tokenize("echo '|' \"&&\"").unwrap();
        let ranges = parse(&tokens, only_echo).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(argv(&ranges[0].stages()[0]), words(&["echo", "|", "&&"]));
    }

    #[test]
    fn test_stage_built_by_hand() {
        let stage = Stage::new("echo", words(&["a", "b"]));
        assert_eq!(stage.name(), "echo");
        assert_eq!(stage.args(), &words(&["a", "b"])[..]);

        let range = PipelineRange::new(vec![stage.clone()], Some(Boundary::Or));
        assert_eq!(range.stages(), &[stage][..]);
        assert_eq!(range.boundary(), Some(Boundary::Or));
    }
}
