use crate::session::Session;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// What the shell should do after a command, a pipeline or a whole line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading input; carries the exit code.
    Continue(ExitCode),
    /// Leave the read loop with the given code.
    Terminate(ExitCode),
}

impl Flow {
    pub fn code(self) -> ExitCode {
        match self {
            Flow::Continue(code) | Flow::Terminate(code) => code,
        }
    }

    pub fn is_terminate(self) -> bool {
        matches!(self, Flow::Terminate(_))
    }
}

impl From<ExitCode> for Flow {
    fn from(code: ExitCode) -> Self {
        Flow::Continue(code)
    }
}

/// An option shown in help output and offered by completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionEntry {
    pub long: String,
    pub short: Option<char>,
    pub description: String,
}

impl OptionEntry {
    /// Two options are the same if either name matches.
    fn same_as(&self, long: &str, short: Option<char>) -> bool {
        self.long == long || (short.is_some() && self.short == short)
    }
}

/// A sub-command shown in help output and offered by completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCommandEntry {
    pub name: String,
    pub description: String,
}

/// Descriptive metadata of a command.
///
/// Options and sub-commands are documentation only: the shell never checks a
/// command's arguments against them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub description: String,
    options: Vec<OptionEntry>,
    sub_commands: Vec<SubCommandEntry>,
}

impl Usage {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Builder form of [`Usage::add_option`].
    pub fn option(mut self, long: &str, short: Option<char>, description: &str) -> Self {
        self.add_option(long, short, description);
        self
    }

    /// Builder form of [`Usage::add_sub_command`].
    pub fn sub_command(mut self, name: &str, description: &str) -> Self {
        self.add_sub_command(name, description);
        self
    }

    /// Add an option, replacing one that shares its long or short name.
    pub fn add_option(&mut self, long: &str, short: Option<char>, description: &str) {
        self.options.retain(|o| !o.same_as(long, short));
        self.options.push(OptionEntry {
            long: long.to_string(),
            short,
            description: description.to_string(),
        });
        self.options.sort_by(|a, b| a.long.cmp(&b.long));
    }

    pub fn remove_option(&mut self, long: &str) {
        self.options.retain(|o| o.long != long);
    }

    pub fn remove_short_option(&mut self, short: char) {
        self.options.retain(|o| o.short != Some(short));
    }

    pub fn add_sub_command(&mut self, name: &str, description: &str) {
        self.sub_commands.retain(|s| s.name != name);
        self.sub_commands.push(SubCommandEntry {
            name: name.to_string(),
            description: description.to_string(),
        });
        self.sub_commands.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn remove_sub_command(&mut self, name: &str) {
        self.sub_commands.retain(|s| s.name != name);
    }

    pub fn options(&self) -> &[OptionEntry] {
        &self.options
    }

    pub fn sub_commands(&self) -> &[SubCommandEntry] {
        &self.sub_commands
    }

    /// Words completion may offer after the command name: sub-commands,
    /// then `--long` and `-s` option spellings.
    pub fn completion_words(&self) -> Vec<String> {
        let mut words: Vec<String> = self.sub_commands.iter().map(|s| s.name.clone()).collect();
        for option in &self.options {
            words.push(format!("--{}", option.long));
            if let Some(short) = option.short {
                words.push(format!("-{short}"));
            }
        }
        words
    }

    /// Render the usage text.
    ///
    /// ```text
    /// sub commands:
    ///   <name>  <description>
    /// options:
    ///   -<s>, --<long>  <description>
    /// ```
    ///
    /// Empty when there is nothing to list; otherwise always ends with `\n`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.sub_commands.is_empty() {
            out.push_str("sub commands:\n");
            for sub in &self.sub_commands {
                let _ = writeln!(out, "  {}  {}", sub.name, sub.description);
            }
        }
        if !self.options.is_empty() {
            out.push_str("options:\n");
            for option in &self.options {
                let names = match option.short {
                    Some(short) => format!("-{short}, --{}", option.long),
                    None => format!("--{}", option.long),
                };
                let _ = writeln!(out, "  {}  {}", names, option.description);
            }
        }
        out
    }
}

/// Object-safe trait for any command that can be executed by the shell.
pub trait Command {
    /// Name the command is registered and invoked under.
    fn name(&self) -> &str;

    fn usage(&self) -> Usage {
        Usage::default()
    }

    /// Executes the command.
    ///
    /// All I/O goes through `session`, which is connected to the pipeline
    /// when the command is a pipeline stage. `args` excludes the command name.
    fn invoke(&self, session: &mut Session<'_>, args: &[String]) -> Result<Flow>;
}

/// A command backed by a closure.
pub struct FnCommand<F> {
    name: String,
    usage: Usage,
    f: F,
}

impl<F, R> FnCommand<F>
where
    F: Fn(&mut Session<'_>, &[String]) -> Result<R>,
    R: Into<Flow>,
{
    pub fn new(name: impl Into<String>, usage: Usage, f: F) -> Self {
        Self {
            name: name.into(),
            usage,
            f,
        }
    }
}

impl<F, R> Command for FnCommand<F>
where
    F: Fn(&mut Session<'_>, &[String]) -> Result<R>,
    R: Into<Flow>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn usage(&self) -> Usage {
        self.usage.clone()
    }

    fn invoke(&self, session: &mut Session<'_>, args: &[String]) -> Result<Flow> {
        (self.f)(session, args).map(Into::into)
    }
}

/// Commands known to a shell, keyed by name.
#[derive(Default)]
pub struct Registry {
    commands: BTreeMap<String, Box<dyn Command>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command`, returning the command it replaced, if any.
    pub fn insert(&mut self, command: impl Command + 'static) -> Option<Box<dyn Command>> {
        self.insert_boxed(Box::new(command))
    }

    pub fn insert_boxed(&mut self, command: Box<dyn Command>) -> Option<Box<dyn Command>> {
        let name = command.name().to_string();
        let previous = self.commands.insert(name.clone(), command);
        if previous.is_some() {
            log::debug!("command {name:?} replaced");
        }
        previous
    }

    /// Register a closure under `name`.
    ///
    /// ```
    /// use cli_shell::command::{Registry, Usage};
    /// let mut registry = Registry::new();
    /// registry.insert_fn("hello", Usage::new("say hello"), |session, _args| {
    ///     session.print("hello\n")?;
    ///     Ok(0)
    /// });
    /// assert!(registry.contains("hello"));
    /// ```
    pub fn insert_fn<F, R>(&mut self, name: &str, usage: Usage, f: F) -> Option<Box<dyn Command>>
    where
        F: Fn(&mut Session<'_>, &[String]) -> Result<R> + 'static,
        R: Into<Flow> + 'static,
    {
        self.insert(FnCommand::new(name, usage, f))
    }

    /// Remove a command and hand its ownership to the caller.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn Command>> {
        self.commands.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.commands.values().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
