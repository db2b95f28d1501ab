use crate::completion::{CompletionIndex, EditorHelper};
use crate::config::ShellConfig;
use crate::interpreter::LineSource;
use anyhow::{Context, Result};
use rustyline::config::{Builder, CompletionType};
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Cmd, Editor, KeyEvent, Modifiers};
use std::path::PathBuf;

/// Terminal line editor feeding the shell: history, hints and completion.
pub struct Readline {
    editor: Editor<EditorHelper, FileHistory>,
    history_file: Option<PathBuf>,
}

impl Readline {
    pub fn new(config: &ShellConfig, index: CompletionIndex) -> Result<Self> {
        let editor_config = Builder::new()
            .max_history_size(config.history.max_size)?
            .history_ignore_dups(config.history.ignore_dups)?
            .auto_add_history(true)
            .completion_type(CompletionType::List)
            .build();

        let mut editor = Editor::with_config(editor_config)?;
        editor.set_helper(Some(EditorHelper::new(index, config.hints)));
        if config.completion_key != '\t' {
            editor.bind_sequence(
                KeyEvent::new(config.completion_key, Modifiers::NONE),
                Cmd::Complete,
            );
        }

        let history_file = config.history_file().map(PathBuf::from);
        if let Some(path) = &history_file {
            // A first session has nothing to load yet.
            if path.exists() {
                editor
                    .load_history(path)
                    .with_context(|| format!("can't load history from {}", path.display()))?;
            }
        }

        Ok(Self {
            editor,
            history_file,
        })
    }

    /// Write the history to the configured file, if any.
    pub fn save_history(&mut self) -> Result<()> {
        if let Some(path) = &self.history_file {
            self.editor
                .save_history(path)
                .with_context(|| format!("can't save history to {}", path.display()))?;
            log::debug!("history saved to {}", path.display());
        }
        Ok(())
    }
}

impl LineSource for Readline {
    fn next_line(&mut self, prompt: &str) -> Option<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Some(line),
            // Ctrl-C drops the line being edited, not the session.
            Err(ReadlineError::Interrupted) => Some(String::new()),
            Err(ReadlineError::Eof) => None,
            Err(err) => {
                log::error!("readline: {err}");
                None
            }
        }
    }
}
