//! The I/O surface commands use.
//!
//! A [`Session`] is lent to a command for the duration of one invocation.
//! Its reads and writes follow the pipeline's working ends, so the same
//! command body works standalone and as any stage of a pipeline.

use crate::command::Registry;
use crate::pipeline::{PipeError, Pipeline};
use std::io;

pub struct Session<'a> {
    pipeline: &'a mut Pipeline,
    registry: &'a Registry,
    prompt: Option<&'a mut String>,
}

impl<'a> Session<'a> {
    pub fn new(pipeline: &'a mut Pipeline, registry: &'a Registry) -> Self {
        Self {
            pipeline,
            registry,
            prompt: None,
        }
    }

    /// Let the command see and replace the shell prompt.
    pub fn with_prompt(mut self, prompt: &'a mut String) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// The shell prompt, if this session is attached to one.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().map(String::as_str)
    }

    /// Replace the prompt shown before the next line. Ignored when the
    /// session has no prompt attached.
    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        if let Some(current) = self.prompt.as_deref_mut() {
            *current = prompt.into();
        }
    }

    /// Write text to the working output: the next stage, or stdout.
    pub fn print(&mut self, text: &str) -> Result<(), PipeError> {
        self.pipeline.write_all(text.as_bytes())
    }

    /// Write text to stderr. Never enters a pipe.
    pub fn eprint(&mut self, text: &str) -> io::Result<()> {
        self.pipeline.write_stderr(text.as_bytes())
    }

    /// Read one line from the working input, without its terminator.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        self.pipeline.read_line()
    }

    /// Read one whitespace-delimited token from the working input.
    pub fn read_token(&mut self) -> io::Result<Option<String>> {
        self.pipeline.read_token()
    }

    pub fn read_to_string(&mut self) -> io::Result<String> {
        self.pipeline.read_to_string()
    }

    /// `true` while this command's output feeds another stage.
    pub fn is_piped(&self) -> bool {
        self.pipeline.opened()
            && matches!(
                self.pipeline.ends().output,
                crate::pipeline::OutputEnd::Buffer(_)
            )
    }

    /// Commands of the running shell. The borrow is independent of `self`,
    /// so a command can keep it while writing.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }
}

/// Lets commands use `write!` / `writeln!` on the session.
impl io::Write for Session<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipeline.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipeline.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{SharedBuffer, StdStreams};
    use std::io::{Cursor, Write};

    #[test]
    fn test_unpiped_session_uses_std_streams() {
        let (out, out_handle) = SharedBuffer::with_handle();
        let (err, err_handle) = SharedBuffer::with_handle();
        let mut pipeline = Pipeline::new(StdStreams::new(
            Cursor::new(b"in 1\nin 2\n".to_vec()),
            Some(Box::new(out)),
            err,
        ));
        let registry = Registry::new();
        let mut session = Session::new(&mut pipeline, &registry);

        assert_eq!(session.read_line().unwrap(), Some("in 1".to_string()));
        assert_eq!(session.read_token().unwrap(), Some("in".to_string()));
        session.print("plain ").unwrap();
        writeln!(session, "{}", 42).unwrap();
        session.eprint("warning\n").unwrap();
        assert!(!session.is_piped());

        assert_eq!(out_handle.text(), "plain 42\n");
        assert_eq!(err_handle.text(), "warning\n");
    }

    #[test]
    fn test_set_prompt_writes_through() {
        let mut pipeline = Pipeline::new(StdStreams::new(
            Cursor::new(Vec::new()),
            None,
            io::sink(),
        ));
        let registry = Registry::new();
        let mut prompt = "> ".to_string();
        {
            let mut session = Session::new(&mut pipeline, &registry).with_prompt(&mut prompt);
            assert_eq!(session.prompt(), Some("> "));
            session.set_prompt("/tmp$ ");
        }
        assert_eq!(prompt, "/tmp$ ");

        let mut detached = Session::new(&mut pipeline, &registry);
        detached.set_prompt("ignored");
        assert_eq!(detached.prompt(), None);
    }

    #[test]
    fn test_write_macro_reports_closed_pipe() {
        let mut pipeline = Pipeline::new(StdStreams::new(
            Cursor::new(Vec::new()),
            None,
            io::sink(),
        ));
        let registry = Registry::new();
        let mut session = Session::new(&mut pipeline, &registry);

        let err = writeln!(session, "lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(matches!(session.print("lost"), Err(PipeError::Closed)));
    }
}
