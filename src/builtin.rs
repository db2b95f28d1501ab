use crate::command::{Command, ExitCode, Flow, Registry, Usage};
use crate::session::Session;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use regex::RegexBuilder;
use std::env;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// in-process through the session, so they read from and write to whatever
/// the pipeline connects them to.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Description and options shown by `help` and offered by completion.
    fn usage() -> Usage;

    /// Executes the command.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, session: &mut Session<'_>) -> Result<Flow>;
}

/// Registry entry for a builtin: parses arguments on every invocation.
pub(crate) struct Builtin<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Builtin<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> Command for Builtin<T> {
    fn name(&self) -> &str {
        T::name()
    }

    fn usage(&self) -> Usage {
        T::usage()
    }

    fn invoke(&self, session: &mut Session<'_>, args: &[String]) -> Result<Flow> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => cmd.execute(session),
            // `--help` lands here with a successful status.
            Err(EarlyExit { output, status }) => match status {
                Ok(()) => {
                    session.print(&output)?;
                    Ok(Flow::Continue(0))
                }
                Err(()) => {
                    session.eprint(&output)?;
                    Ok(Flow::Continue(1))
                }
            },
        }
    }
}

/// A registry holding every builtin.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.insert(Builtin::<Help>::default());
    registry.insert(Builtin::<Exit>::default());
    registry.insert(Builtin::<Echo>::default());
    registry.insert(Builtin::<Clear>::default());
    registry.insert(Builtin::<True>::default());
    registry.insert(Builtin::<False>::default());
    registry.insert(Builtin::<Pwd>::default());
    registry.insert(Builtin::<Cd>::default());
    registry.insert(Builtin::<Cat>::default());
    registry.insert(Builtin::<WC>::default());
    registry.insert(Builtin::<Grep>::default());
    registry
}

#[derive(FromArgs)]
/// List all available commands, or describe the given ones.
pub struct Help {
    #[argh(positional, greedy)]
    /// commands to describe.
    pub names: Vec<String>,
}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn usage() -> Usage {
        Usage::new("list all available commands or print help for specified command")
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        let registry = session.registry();

        if self.names.is_empty() {
            let width = registry.names().map(str::len).max().unwrap_or(0);
            for command in registry.iter() {
                writeln!(
                    session,
                    "  {:<width$}  {}",
                    command.name(),
                    command.usage().description
                )?;
            }
            return Ok(Flow::Continue(0));
        }

        let mut code = 0;
        for name in &self.names {
            match registry.lookup(name) {
                Some(command) => {
                    let usage = command.usage();
                    writeln!(session, "{}: {}", name, usage.description)?;
                    write!(session, "{}", usage.render())?;
                }
                None => {
                    session.eprint(&format!("help: {name}: no such command\n"))?;
                    code = 1;
                }
            }
        }
        Ok(Flow::Continue(code))
    }
}

#[derive(FromArgs)]
/// Exit the shell with the given code.
pub struct Exit {
    #[argh(positional)]
    /// exit code, 0 when omitted.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn usage() -> Usage {
        Usage::new("exit the shell with the given code")
    }

    fn execute(self, _session: &mut Session<'_>) -> Result<Flow> {
        Ok(Flow::Terminate(self.code.unwrap_or(0)))
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn usage() -> Usage {
        Usage::new("write the arguments to standard output").option(
            "no-newline",
            Some('n'),
            "do not output the trailing newline",
        )
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(session, "{}", s)?;
        } else {
            writeln!(session, "{}", s)?;
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn usage() -> Usage {
        Usage::new("clear screen")
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        session.print("\x1b[2J\x1b[H")?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Do nothing, successfully.
pub struct True {}

impl BuiltinCommand for True {
    fn name() -> &'static str {
        "true"
    }

    fn usage() -> Usage {
        Usage::new("do nothing, successfully")
    }

    fn execute(self, _session: &mut Session<'_>) -> Result<Flow> {
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Do nothing, unsuccessfully.
pub struct False {}

impl BuiltinCommand for False {
    fn name() -> &'static str {
        "false"
    }

    fn usage() -> Usage {
        Usage::new("do nothing, unsuccessfully")
    }

    fn execute(self, _session: &mut Session<'_>) -> Result<Flow> {
        Ok(Flow::Continue(1))
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn usage() -> Usage {
        Usage::new("print working directory")
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        let cwd = env::current_dir().context("pwd: can't read current directory")?;
        writeln!(session, "{}", cwd.to_string_lossy())?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn usage() -> Usage {
        Usage::new("change working directory")
    }

    fn execute(self, _session: &mut Session<'_>) -> Result<Flow> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow::anyhow!("no target and HOME not set")),
            },
        };

        let canonical = fs::canonicalize(&target)
            .with_context(|| format!("can't canonicalize {}", target.display()))?;
        if !canonical.is_dir() {
            anyhow::bail!("{} is not a directory", canonical.display());
        }

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// count lines, words and bytes
pub struct WC {
    #[argh(positional, greedy)]
    /// files to count; reads the input when none are given.
    pub files: Vec<String>,
}

fn count(text: &str) -> (usize, usize, usize) {
    (text.lines().count(), text.split_whitespace().count(), text.len())
}

impl BuiltinCommand for WC {
    fn name() -> &'static str {
        "wc"
    }

    fn usage() -> Usage {
        Usage::new("count lines, words and bytes")
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        if self.files.is_empty() {
            let buf = session.read_to_string()?;
            let (lines, words, bytes) = count(&buf);
            writeln!(session, "{} {} {}", lines, words, bytes)?;
            return Ok(Flow::Continue(0));
        }
        for fname in &self.files {
            let s = fs::read_to_string(fname).with_context(|| fname.clone())?;
            let (lines, words, bytes) = count(&s);
            writeln!(session, "{} {} {} {}", lines, words, bytes, fname)?;
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// print file(s) to stdout
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print; copies the input when none are given.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn usage() -> Usage {
        Usage::new("print files, or the input, to the output")
    }

    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        if self.files.is_empty() {
            let buf = session.read_to_string()?;
            session.print(&buf)?;
            return Ok(Flow::Continue(0));
        }
        for fname in &self.files {
            let bytes = fs::read(fname).with_context(|| fname.clone())?;
            session.write_all(&bytes)?;
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// print lines matching a pattern
pub struct Grep {
    #[argh(positional)]
    /// the pattern to search for (a regular expression)
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, reads the input.
    pub files: Vec<String>,

    #[argh(switch, short = 'w')]
    /// match only whole words (using non-word characters as boundaries)
    pub word_regexp: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(option, short = 'A', default = "0")]
    /// print NUM lines of trailing context after matching lines
    pub after_context: usize,
}

impl Grep {
    /// Print the matching lines of `text`; returns whether anything matched.
    fn process_source(
        &self,
        text: &str,
        session: &mut Session<'_>,
        file_name: Option<&str>,
        re: &regex::Regex,
    ) -> Result<bool> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        if lines.is_empty() {
            return Ok(false);
        }

        let total_lines = lines.len();
        let mut to_print = vec![false; total_lines];
        let mut matched = false;

        for (i, line) in lines.iter().enumerate() {
            if re.is_match(line) {
                matched = true;
                let end_print = (i + self.after_context + 1).min(total_lines);
                to_print[i..end_print].fill(true);
            }
        }

        let prefix = file_name
            .map(|name| format!("{}:", name))
            .unwrap_or_default();
        let mut last_printed_index: Option<usize> = None;

        for (i, line) in lines.iter().enumerate() {
            if !to_print[i] {
                continue;
            }
            if self.after_context > 0 && last_printed_index.is_some_and(|last| i > last + 1) {
                session.print("--\n")?;
            }
            write!(session, "{}{}", prefix, line)?;
            last_printed_index = Some(i);
        }

        Ok(matched)
    }
}

impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    fn usage() -> Usage {
        Usage::new("print lines matching a pattern")
            .option("word-regexp", Some('w'), "match only whole words")
            .option("ignore-case", Some('i'), "ignore case distinctions")
            .option(
                "after-context",
                Some('A'),
                "print NUM lines of trailing context after matching lines",
            )
    }

    /// Exit code is 0 when any line matched and 1 otherwise.
    fn execute(self, session: &mut Session<'_>) -> Result<Flow> {
        let pattern = if self.word_regexp {
            format!(r"\b({})\b", self.pattern)
        } else {
            self.pattern.clone()
        };

        let re = RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .with_context(|| format!("invalid regex pattern: {}", pattern))?;

        if self.files.is_empty() {
            let text = session.read_to_string()?;
            let matched = self.process_source(&text, session, None, &re)?;
            return Ok(Flow::Continue(if matched { 0 } else { 1 }));
        }

        let mut matched = false;
        let mut failed = false;
        for file_name in &self.files {
            match fs::read_to_string(file_name) {
                Ok(text) => {
                    matched |= self.process_source(&text, session, Some(file_name), &re)?;
                }
                Err(e) => {
                    session.eprint(&format!("grep: {}: {}\n", file_name, e))?;
                    failed = true;
                }
            }
        }
        Ok(Flow::Continue(if failed || !matched { 1 } else { 0 }))
    }
}
