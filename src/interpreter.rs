use crate::command::{Command, ExitCode, Flow, Registry, Usage};
use crate::completion::CompletionIndex;
use crate::config::ShellConfig;
use crate::io_adapters::StdStreams;
use crate::lexer::{self, SyntaxError};
use crate::parser::{self, Boundary, ParseError, PipelineRange, Stage};
use crate::pipeline::{OpenPipeline, Pipeline};
use crate::readline::Readline;
use crate::session::Session;
use log::{debug, warn};
use thiserror::Error;

/// Anything that supplies raw input lines to the shell.
pub trait LineSource {
    /// Next line, or `None` when input is exhausted.
    ///
    /// `prompt` is the shell's current prompt; it may change between lines.
    fn next_line(&mut self, prompt: &str) -> Option<String>;
}

impl<I: Iterator<Item = String>> LineSource for I {
    fn next_line(&mut self, _prompt: &str) -> Option<String> {
        self.next()
    }
}

/// Errors that reject a whole input line before anything runs.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// An interactive command shell.
///
/// The shell owns a [`Registry`] of commands and a [`Pipeline`]. Each input
/// line is tokenized, parsed into pipeline ranges, and executed; stages of a
/// range talk through in-memory buffers instead of OS pipes.
///
/// Example
/// ```
/// use cli_shell::command::{Flow, Usage};
/// use cli_shell::io_adapters::{SharedBuffer, StdStreams};
/// use cli_shell::Shell;
///
/// let (out, captured) = SharedBuffer::with_handle();
/// let streams = StdStreams::new(std::io::empty(), Some(Box::new(out)), std::io::sink());
/// let mut sh = Shell::with_streams(streams);
/// sh.insert_fn("shout", Usage::new("upper-case the input"), |session, _args| {
///     let text = session.read_to_string()?;
///     session.print(&text.to_uppercase())?;
///     Ok(0)
/// });
///
/// let flow = sh.run_line("echo hello | shout").unwrap();
/// assert_eq!(flow, Flow::Continue(0));
/// assert_eq!(captured.text(), "HELLO\n");
/// ```
pub struct Shell {
    registry: Registry,
    pipeline: Pipeline,
    config: ShellConfig,
    last_code: ExitCode,
}

impl Shell {
    /// Create a shell with a custom registry and the process streams.
    pub fn new(registry: Registry, config: ShellConfig) -> Self {
        Self {
            registry,
            pipeline: Pipeline::default(),
            config,
            last_code: 0,
        }
    }

    /// Create a shell with the built-in commands and the given streams.
    pub fn with_streams(streams: StdStreams) -> Self {
        Self::with_pipeline(Pipeline::new(streams))
    }

    /// Create a shell with the built-in commands over a prepared pipeline,
    /// e.g. one built with [`Pipeline::with_buffers`].
    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            registry: crate::builtin::registry(),
            pipeline,
            config: ShellConfig::default(),
            last_code: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ShellConfig) {
        self.config = config;
    }

    /// Prompt shown before the next interactive line.
    pub fn prompt(&self) -> &str {
        &self.config.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.config.prompt = prompt.into();
    }

    /// Exit code of the last line that ran.
    pub fn last_code(&self) -> ExitCode {
        self.last_code
    }

    /// See [`Registry::insert`].
    pub fn insert(&mut self, command: impl Command + 'static) -> Option<Box<dyn Command>> {
        self.registry.insert(command)
    }

    /// See [`Registry::insert_fn`].
    pub fn insert_fn<F, R>(&mut self, name: &str, usage: Usage, f: F) -> Option<Box<dyn Command>>
    where
        F: Fn(&mut Session<'_>, &[String]) -> anyhow::Result<R> + 'static,
        R: Into<Flow> + 'static,
    {
        self.registry.insert_fn(name, usage, f)
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn Command>> {
        self.registry.take(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Run a single command invocation by name with arguments, outside of
    /// any pipeline.
    ///
    /// Returns an error if the command is unknown or fails.
    pub fn run(&mut self, name: &str, args: &[&str]) -> anyhow::Result<Flow> {
        let command = self
            .registry
            .lookup(name)
            .ok_or_else(|| anyhow::anyhow!("{name}: no such command"))?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut session = Session::new(&mut self.pipeline, &self.registry)
            .with_prompt(&mut self.config.prompt);
        let flow = command.invoke(&mut session, &args);
        self.pipeline.flush()?;
        flow
    }

    /// Tokenize, parse and execute one input line.
    ///
    /// Syntax and parse errors are returned before any command runs. A blank
    /// line does nothing and yields `Continue(0)`.
    pub fn run_line(&mut self, line: &str) -> Result<Flow, LineError> {
        let tokens = lexer::tokenize(line)?;
        if tokens.is_empty() {
            return Ok(Flow::Continue(0));
        }
        debug!("tokens: {:?}", tokens);

        let registry = &self.registry;
        let ranges = parser::parse(&tokens, |name| registry.contains(name))?;
        debug!("ranges: {:?}", ranges);

        let flow = self.run_all(&ranges);
        self.last_code = flow.code();
        Ok(flow)
    }

    /// Execute every range of a line and fold their exit codes.
    ///
    /// Every range runs, whatever the result so far; the `&&` / `||` boundary
    /// of each later range only decides how its success combines with the
    /// running result (see [`combine`]). A single range yields its own exit
    /// code unchanged. `Terminate` stops at once.
    pub fn run_all(&mut self, ranges: &[PipelineRange]) -> Flow {
        let Some((first, rest)) = ranges.split_first() else {
            return Flow::Continue(0);
        };

        let mut code = match self.run_range(first) {
            Flow::Continue(code) => code,
            terminate => return terminate,
        };
        for range in rest {
            let range_code = match self.run_range(range) {
                Flow::Continue(code) => code,
                terminate => return terminate,
            };
            code = combine(code, range.boundary(), range_code);
        }
        Flow::Continue(code)
    }

    /// Execute one pipeline range.
    ///
    /// Stage N's output is routed to the buffer stage N+1 reads; the last stage
    /// writes to stdout. The result is the bitwise OR of all stage codes. The
    /// pipeline is closed again on every way out of this function.
    pub fn run_range(&mut self, range: &PipelineRange) -> Flow {
        let registry = &self.registry;
        let prompt = &mut self.config.prompt;
        let mut pipeline = OpenPipeline::new(&mut self.pipeline);

        let mut code = 0;
        let last = range.stages().len().saturating_sub(1);
        for (i, stage) in range.stages().iter().enumerate() {
            pipeline.route_stage(i == last);
            match dispatch(registry, &mut pipeline, prompt, stage) {
                Flow::Continue(stage_code) => code |= stage_code,
                terminate => return terminate,
            }
            if i != last {
                pipeline.advance_stage();
            }
        }
        debug!("range exit code: {code}");
        Flow::Continue(code)
    }

    /// Top-level loop: run lines from `source` until it is exhausted or a
    /// command terminates the session.
    ///
    /// Line-level errors are reported on stderr and the loop resumes. Returns
    /// the code carried by `Terminate`, or 0 at end of input.
    pub fn exec(&mut self, source: &mut dyn LineSource) -> ExitCode {
        while let Some(line) = source.next_line(&self.config.prompt) {
            match self.run_line(&line) {
                Ok(Flow::Continue(_)) => {}
                Ok(Flow::Terminate(code)) => {
                    debug!("session terminated with code {code}");
                    return code;
                }
                Err(err) => {
                    warn!("rejected line {line:?}: {err}");
                    self.pipeline.report(&err.to_string());
                }
            }
        }
        0
    }

    /// Interactive Read-Eval-Print Loop on the terminal.
    ///
    /// Completion sees the commands registered when the loop starts.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        let index = CompletionIndex::from(&self.registry);
        let mut readline = Readline::new(&self.config, index)?;
        let code = self.exec(&mut readline);
        readline.save_history()?;
        Ok(code)
    }
}

impl Default for Shell {
    /// Create a shell with the built-in commands, the default configuration and
    /// the process streams.
    fn default() -> Self {
        Self::new(crate::builtin::registry(), ShellConfig::default())
    }
}

/// Run one stage. A failing command is reported and counts as exit code 1.
fn dispatch(
    registry: &Registry,
    pipeline: &mut Pipeline,
    prompt: &mut String,
    stage: &Stage,
) -> Flow {
    let Some(command) = registry.lookup(stage.name()) else {
        pipeline.report(&format!("{}: no such command", stage.name()));
        return Flow::Continue(1);
    };

    let mut session = Session::new(pipeline, registry).with_prompt(prompt);
    match command.invoke(&mut session, stage.args()) {
        Ok(flow) => {
            debug!("{} -> {:?}", stage.name(), flow);
            flow
        }
        Err(err) => {
            warn!("{} failed: {err:#}", stage.name());
            pipeline.report(&format!("{}: {err:#}", stage.name()));
            Flow::Continue(1)
        }
    }
}

/// Fold the running result of a line with the next range's exit code.
///
/// Both sides count as successful when their code is 0. The combined result
/// is 0 when `prev && next` (for `&&`) or `prev || next` (for `||`) holds,
/// and 1 otherwise.
pub fn combine(previous: ExitCode, boundary: Option<Boundary>, next: ExitCode) -> ExitCode {
    let previous_ok = previous == 0;
    let next_ok = next == 0;
    let ok = match boundary {
        Some(Boundary::And) => previous_ok && next_ok,
        Some(Boundary::Or) => previous_ok || next_ok,
        None => next_ok,
    };
    if ok { 0 } else { 1 }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::io_adapters::{MemPipe, SharedBuffer};
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;
    use std::rc::Rc;

    struct Harness {
        shell: Shell,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    fn harness(stdin: &str) -> Harness {
        let (out, out_handle) = SharedBuffer::with_handle();
        let (err, err_handle) = SharedBuffer::with_handle();
        let streams = StdStreams::new(
            Cursor::new(stdin.as_bytes().to_vec()),
            Some(Box::new(out)),
            err,
        );
        let mut shell = Shell::with_streams(streams);
        shell.insert_fn("ret", Usage::new("return the given code"), |_session, args| {
            Ok(args.first().map_or(Ok(0), |a| a.parse::<ExitCode>())?)
        });
        Harness {
            shell,
            out: out_handle,
            err: err_handle,
        }
    }

    fn ranges(shell: &Shell, line: &str) -> Vec<PipelineRange> {
        let tokens = lexer::tokenize(line).unwrap();
        parser::parse(&tokens, |name| shell.contains(name)).unwrap()
    }

    #[test]
    fn test_echo_pipe_wc_output() {
        let mut h = harness("");
        let flow = h.shell.run_line("echo \"22\" | wc").unwrap();
        assert_eq!(flow, Flow::Continue(0));
        assert_eq!(h.out.text(), "1 1 3\n");
    }

    #[test]
    fn test_standalone_stage_reads_real_stdin() {
        let mut h = harness("line one\nline two\n");
        h.shell.run_line("cat").unwrap();
        assert_eq!(h.out.text(), "line one\nline two\n");
    }

    #[test]
    fn test_two_stage_pipe_is_byte_exact() {
        let mut h = harness("");
        let seen = Rc::new(RefCell::new(String::new()));
        let sink = seen.clone();
        h.shell.insert_fn("produce", Usage::default(), |session, _| {
            session.print("a\tb \n\nc")?;
            Ok(0)
        });
        h.shell.insert_fn("consume", Usage::default(), move |session, _| {
            sink.borrow_mut().push_str(&session.read_to_string()?);
            Ok(0)
        });

        h.shell.run_line("produce | consume").unwrap();
        assert_eq!(*seen.borrow(), "a\tb \n\nc");
        assert_eq!(h.out.text(), "");
    }

    #[test]
    fn test_three_stage_pipeline() {
        let mut h = harness("");
        h.shell
            .run_line("echo one two three | grep -w two | wc")
            .unwrap();
        assert_eq!(h.out.text(), "1 3 14\n");
    }

    #[test]
    fn test_middle_stage_sees_only_previous_output() {
        let mut h = harness("");
        h.shell.insert_fn("half", Usage::default(), |session, _| {
            // Consume one line and forward it, leaving the rest unread.
            if let Some(line) = session.read_line()? {
                session.print(&format!("{line}\n"))?;
            }
            Ok(0)
        });
        h.shell
            .run_line("echo first | half | half | cat")
            .unwrap();
        assert_eq!(h.out.text(), "first\n");
    }

    #[test]
    fn test_range_code_is_bitwise_or() {
        let mut h = harness("");
        let r = ranges(&h.shell, "ret 1 | ret 2 | ret 0");
        assert_eq!(h.shell.run_range(&r[0]), Flow::Continue(3));
    }

    #[test]
    fn test_failing_stage_does_not_stop_the_range() {
        let mut h = harness("");
        h.shell.insert_fn("boom", Usage::default(), |_session, _| -> anyhow::Result<ExitCode> {
            anyhow::bail!("exploded")
        });
        let flow = h.shell.run_line("boom | echo after").unwrap();
        assert_eq!(flow, Flow::Continue(1));
        assert_eq!(h.out.text(), "after\n");
        assert_eq!(h.err.text(), "boom: exploded\n");
    }

    #[test]
    fn test_run_range_clears_residual_buffers() {
        let first = Rc::new(RefCell::new(MemPipe::new()));
        let second = Rc::new(RefCell::new(MemPipe::new()));
        let (out, out_handle) = SharedBuffer::with_handle();
        let streams = StdStreams::new(
            Cursor::new(Vec::new()),
            Some(Box::new(out)),
            std::io::sink(),
        );
        let mut shell =
            Shell::with_pipeline(Pipeline::with_buffers(streams, first.clone(), second.clone()));

        shell.insert_fn("peek", Usage::default(), |session, _| {
            let text = session.read_to_string()?;
            session.print(&format!("[{text}]"))?;
            Ok(0)
        });
        std::io::Write::write_all(&mut *second.borrow_mut(), b"stale").unwrap();

        let r = ranges(&shell, "echo -n fresh | peek");
        shell.run_range(&r[0]);
        assert_eq!(out_handle.text(), "[fresh]");
        assert!(second.borrow().is_empty());
    }

    #[test]
    fn test_single_range_keeps_raw_code() {
        let mut h = harness("");
        assert_eq!(h.shell.run_line("ret 7").unwrap(), Flow::Continue(7));
        assert_eq!(h.shell.last_code(), 7);
    }

    #[test]
    fn test_and_or_run_every_range() {
        let mut h = harness("");
        let calls = Rc::new(Cell::new(0));
        for (name, code) in [("t", 0), ("f", 1)] {
            let calls = calls.clone();
            h.shell.insert_fn(name, Usage::default(), move |_session, _| {
                calls.set(calls.get() + 1);
                Ok(code)
            });
        }

        assert_eq!(h.shell.run_line("t && f").unwrap(), Flow::Continue(1));
        assert_eq!(calls.get(), 2);
        assert_eq!(h.shell.run_line("f || t").unwrap(), Flow::Continue(0));
        assert_eq!(calls.get(), 4);
        assert_eq!(h.shell.run_line("f && t").unwrap(), Flow::Continue(1));
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn test_true_false_builtins_combine() {
        let mut h = harness("");
        assert_eq!(h.shell.run_line("true && false").unwrap(), Flow::Continue(1));
        assert_eq!(h.shell.run_line("false || true").unwrap(), Flow::Continue(0));
        assert_eq!(h.shell.run_line("ret 5 || ret 6").unwrap(), Flow::Continue(1));
    }

    #[test]
    fn test_combine_table() {
        assert_eq!(combine(0, Some(Boundary::And), 0), 0);
        assert_eq!(combine(0, Some(Boundary::And), 3), 1);
        assert_eq!(combine(2, Some(Boundary::And), 0), 1);
        assert_eq!(combine(0, Some(Boundary::Or), 9), 0);
        assert_eq!(combine(4, Some(Boundary::Or), 0), 0);
        assert_eq!(combine(4, Some(Boundary::Or), 5), 1);
    }

    #[test]
    fn test_exit_terminates_mid_pipeline() {
        let mut h = harness("");
        let after = Rc::new(Cell::new(false));
        let flag = after.clone();
        h.shell.insert_fn("after", Usage::default(), move |_session, _| {
            flag.set(true);
            Ok(0)
        });

        let flow = h.shell.run_line("echo x | exit 3 | after && after").unwrap();
        assert_eq!(flow, Flow::Terminate(3));
        assert!(!after.get());
        assert!(!h.shell.pipeline.opened());
    }

    #[test]
    fn test_syntax_and_parse_errors_run_nothing() {
        let mut h = harness("");
        assert!(matches!(
            h.shell.run_line("echo 'open"),
            Err(LineError::Syntax(SyntaxError::UnbalancedQuote('\'')))
        ));
        assert!(matches!(
            h.shell.run_line("echo ran && nosuch"),
            Err(LineError::Parse(ParseError::UnknownCommand(_)))
        ));
        assert!(matches!(
            h.shell.run_line("echo ran |"),
            Err(LineError::Parse(ParseError::TrailingOperator(_)))
        ));
        assert_eq!(h.out.text(), "");
    }

    #[test]
    fn test_blank_line_is_a_no_op() {
        let mut h = harness("");
        assert_eq!(h.shell.run_line("   \t").unwrap(), Flow::Continue(0));
    }

    #[test]
    fn test_exec_reports_errors_and_stops_on_exit() {
        let mut h = harness("");
        let mut lines = vec![
            "echo before".to_string(),
            "".to_string(),
            "nosuch arg".to_string(),
            "echo \"unclosed".to_string(),
            "exit 4".to_string(),
            "echo never".to_string(),
        ]
        .into_iter();

        let code = h.shell.exec(&mut lines);
        assert_eq!(code, 4);
        assert_eq!(h.out.text(), "before\n");
        assert_eq!(
            h.err.text(),
            "parse error: nosuch: no such command\nsyntax error: unbalanced quote '\"'\n"
        );
        assert_eq!(lines.next(), Some("echo never".to_string()));
    }

    #[test]
    fn test_exec_returns_zero_at_end_of_input() {
        let mut h = harness("");
        let mut lines = vec!["false".to_string()].into_iter();
        assert_eq!(h.shell.exec(&mut lines), 0);
        assert_eq!(h.shell.last_code(), 1);
    }

    #[test]
    fn test_run_single_command() {
        let mut h = harness("");
        assert_eq!(h.shell.run("echo", &["hello", "world"]).unwrap(), Flow::Continue(0));
        assert_eq!(h.out.text(), "hello world\n");
        assert!(h.shell.run("nosuch", &[]).is_err());
    }

    #[test]
    fn test_write_to_closed_stdout_is_reported() {
        let (err, err_handle) = SharedBuffer::with_handle();
        let streams = StdStreams::new(Cursor::new(Vec::new()), None, err);
        let mut shell = Shell::with_streams(streams);

        let flow = shell.run_line("echo nowhere").unwrap();
        assert_eq!(flow, Flow::Continue(1));
        assert_eq!(err_handle.text(), "echo: write to a closed pipe\n");
        assert!(!shell.pipeline.opened());
    }

    /// Feeds fixed lines and remembers the prompt shown before each one.
    struct Scripted {
        lines: Vec<String>,
        prompts: Vec<String>,
    }

    impl LineSource for Scripted {
        fn next_line(&mut self, prompt: &str) -> Option<String> {
            self.prompts.push(prompt.to_string());
            (!self.lines.is_empty()).then(|| self.lines.remove(0))
        }
    }

    #[test]
    fn test_command_changes_prompt_for_next_line() {
        let mut h = harness("");
        h.shell.insert_fn("enter", Usage::default(), |session, args| {
            session.set_prompt(format!("{}$ ", args.join(" ")));
            Ok(0)
        });
        h.shell.set_prompt("> ");

        let mut source = Scripted {
            lines: vec!["enter /tmp".to_string(), "echo x | enter /var".to_string()],
            prompts: Vec::new(),
        };
        assert_eq!(h.shell.exec(&mut source), 0);
        assert_eq!(source.prompts, vec!["> ", "/tmp$ ", "/var$ "]);
        assert_eq!(h.shell.prompt(), "/var$ ");
    }

    #[test]
    fn test_run_range_built_by_hand() {
        let mut h = harness("");
        let range = PipelineRange::new(
            vec![
                Stage::new("echo", vec!["hand".to_string()]),
                Stage::new("wc", Vec::new()),
            ],
            None,
        );
        assert_eq!(h.shell.run_range(&range), Flow::Continue(0));
        assert_eq!(h.out.text(), "1 1 5\n");

        let unknown = PipelineRange::new(vec![Stage::new("nosuch", Vec::new())], None);
        assert_eq!(h.shell.run_range(&unknown), Flow::Continue(1));
        assert_eq!(h.err.text(), "nosuch: no such command\n");

        let empty = PipelineRange::new(Vec::new(), None);
        assert_eq!(h.shell.run_range(&empty), Flow::Continue(0));
    }
}
