//! Tab completion for the interactive line editor.

use crate::command::Registry;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Snapshot of the command names of a registry and the words each command
/// accepts after its name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionIndex {
    commands: BTreeMap<String, Vec<String>>,
}

/// Command whose arguments complete to command names.
const HELP: &str = "help";

impl From<&Registry> for CompletionIndex {
    fn from(registry: &Registry) -> Self {
        let mut commands: BTreeMap<String, Vec<String>> = registry
            .iter()
            .map(|command| {
                (
                    command.name().to_string(),
                    command.usage().completion_words(),
                )
            })
            .collect();
        if let Some(words) = commands.get_mut(HELP) {
            let mut names: Vec<String> = registry.names().map(str::to_string).collect();
            names.append(words);
            *words = names;
        }
        Self { commands }
    }
}

fn is_word_break(c: char) -> bool {
    c.is_whitespace() || c == '|' || c == '&'
}

/// Byte index just past the last char of `s` matching `pred`, or 0.
fn after_last(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.char_indices()
        .rev()
        .find(|&(_, c)| pred(c))
        .map_or(0, |(i, c)| i + c.len_utf8())
}

/// Byte index where the stage around the end of `s` starts: just past the
/// last `|`, `||` or `&&`. A lone `&` does not start a stage.
fn stage_start(s: &str) -> usize {
    let pipe = s.rfind('|').map(|i| i + 1);
    let and = s.rfind("&&").map(|i| i + 2);
    pipe.max(and).unwrap_or(0)
}

impl CompletionIndex {
    /// Candidates for the word ending at byte offset `pos` of `line`.
    ///
    /// Returns the offset where the word starts together with the candidates
    /// that could replace it. A word at the start of a stage completes to
    /// command names; any later word completes to the sub-commands and
    /// options of that stage's command.
    pub fn complete(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let Some(head) = line.get(..pos) else {
            return (pos, Vec::new());
        };
        let start = after_last(head, is_word_break);
        let prefix = &head[start..];

        let stage = &head[stage_start(&head[..start])..start];
        let candidates: Vec<String> = match stage.split_whitespace().next() {
            None => self
                .commands
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect(),
            Some(name) => self
                .commands
                .get(name)
                .into_iter()
                .flatten()
                .filter(|word| word.starts_with(prefix))
                .cloned()
                .collect(),
        };
        (start, candidates)
    }
}

/// rustyline helper: completion from a [`CompletionIndex`] and history hints.
pub(crate) struct EditorHelper {
    index: CompletionIndex,
    hinter: Option<HistoryHinter>,
}

impl EditorHelper {
    pub(crate) fn new(index: CompletionIndex, hints: bool) -> Self {
        Self {
            index,
            hinter: hints.then(HistoryHinter::new),
        }
    }
}

impl Completer for EditorHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, words) = self.index.complete(line, pos);
        let candidates = words
            .into_iter()
            .map(|word| Pair {
                display: word.clone(),
                replacement: word,
            })
            .collect();
        Ok((start, candidates))
    }
}

impl Hinter for EditorHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &Context<'_>) -> Option<String> {
        self.hinter.as_ref()?.hint(line, pos, ctx)
    }
}

impl Highlighter for EditorHelper {
    // Display hints with low intensity
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned("\x1b[2m".to_owned() + hint + "\x1b[m")
    }
}

impl Validator for EditorHelper {}

impl Helper for EditorHelper {}
