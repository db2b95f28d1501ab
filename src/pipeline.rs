//! In-process pipes between stages.
//!
//! Two [`MemPipe`] buffers are shared by every pipeline a shell runs. While a
//! range executes, the [`WorkingEnds`] say where the current stage reads from
//! and writes to; stage N always writes into the buffer that is not holding
//! its own input, and stage N+1 then reads from that buffer.

use crate::io_adapters::{MemPipe, StdStreams, read_line_from, read_token_from};
use log::{debug, trace};
use std::cell::RefCell;
use std::io::{self, BufRead, Read, Write};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use thiserror::Error;

/// One of the two pipe buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    First,
    Second,
}

impl BufferId {
    pub fn other(self) -> Self {
        match self {
            BufferId::First => BufferId::Second,
            BufferId::Second => BufferId::First,
        }
    }

    fn index(self) -> usize {
        match self {
            BufferId::First => 0,
            BufferId::Second => 1,
        }
    }
}

/// Where the running stage reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEnd {
    Stdin,
    Buffer(BufferId),
}

/// Where the running stage writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEnd {
    Stdout,
    Buffer(BufferId),
    Closed,
}

/// Current input and output of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingEnds {
    pub input: InputEnd,
    pub output: OutputEnd,
}

impl WorkingEnds {
    /// Ends at the start of a range: reading the real stdin, no output yet.
    pub fn open_pipeline() -> Self {
        Self {
            input: InputEnd::Stdin,
            output: OutputEnd::Closed,
        }
    }

    /// Pick the output of the stage about to run.
    ///
    /// The last stage writes to the real stdout; any other stage writes to the
    /// buffer that is not its input.
    pub fn route_stage(self, last: bool) -> Self {
        let output = if last {
            OutputEnd::Stdout
        } else {
            match self.input {
                InputEnd::Stdin => OutputEnd::Buffer(BufferId::First),
                InputEnd::Buffer(id) => OutputEnd::Buffer(id.other()),
            }
        };
        Self { output, ..self }
    }

    /// After a stage returns: its output buffer becomes the next stage's input.
    pub fn advance_stage(self) -> Self {
        let input = match self.output {
            OutputEnd::Buffer(id) => InputEnd::Buffer(id),
            OutputEnd::Stdout | OutputEnd::Closed => self.input,
        };
        Self {
            input,
            output: OutputEnd::Closed,
        }
    }

    pub fn close_pipeline(self) -> Self {
        Self {
            input: InputEnd::Stdin,
            output: OutputEnd::Closed,
        }
    }
}

impl Default for WorkingEnds {
    fn default() -> Self {
        Self::open_pipeline().close_pipeline()
    }
}

/// Errors raised by pipeline output.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Nothing is connected to the output: no open pipe and no stdout.
    #[error("write to a closed pipe")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        match err {
            PipeError::Io(e) => e,
            closed => io::Error::new(io::ErrorKind::BrokenPipe, closed),
        }
    }
}

/// A pipe buffer, either owned by the shell or lent to it by the caller.
struct PipeBuffer {
    stream: Rc<RefCell<MemPipe>>,
    external: bool,
}

impl PipeBuffer {
    fn owned() -> Self {
        Self {
            stream: Rc::new(RefCell::new(MemPipe::new())),
            external: false,
        }
    }

    fn external(stream: Rc<RefCell<MemPipe>>) -> Self {
        Self {
            stream,
            external: true,
        }
    }

    fn clear(&self) {
        self.stream.borrow_mut().clear();
    }
}

/// The two pipe buffers, the working ends, and the real process streams.
///
/// While the pipeline is closed, reads come from the real stdin and writes go
/// to the real stdout. While it is open, the working ends decide.
pub struct Pipeline {
    buffers: [PipeBuffer; 2],
    ends: WorkingEnds,
    opened: bool,
    streams: StdStreams,
}

impl Pipeline {
    /// Create a pipeline with its own buffers.
    pub fn new(streams: StdStreams) -> Self {
        Self {
            buffers: [PipeBuffer::owned(), PipeBuffer::owned()],
            ends: WorkingEnds::default(),
            opened: false,
            streams,
        }
    }

    /// Create a pipeline over caller-provided buffers.
    ///
    /// The caller keeps its own handles, so the buffers outlive the pipeline
    /// and can be inspected after a run.
    pub fn with_buffers(
        streams: StdStreams,
        first: Rc<RefCell<MemPipe>>,
        second: Rc<RefCell<MemPipe>>,
    ) -> Self {
        Self {
            buffers: [PipeBuffer::external(first), PipeBuffer::external(second)],
            ends: WorkingEnds::default(),
            opened: false,
            streams,
        }
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn ends(&self) -> WorkingEnds {
        self.ends
    }

    /// Empty both buffers.
    pub fn clear_all(&mut self) {
        for buffer in &self.buffers {
            buffer.clear();
        }
    }

    /// Clear both buffers and start reading from the real stdin.
    pub fn open(&mut self) {
        self.clear_all();
        self.ends = WorkingEnds::open_pipeline();
        self.opened = true;
        trace!(
            "pipeline opened (external buffers: {})",
            self.buffers[0].external
        );
    }

    pub fn close(&mut self) {
        self.ends = self.ends.close_pipeline();
        self.opened = false;
        if let Err(err) = self.flush() {
            log::error!("failed to flush stdout: {err}");
        }
        trace!("pipeline closed");
    }

    /// Route the output of the stage about to run. No-op while closed.
    pub fn route_stage(&mut self, last: bool) {
        if !self.opened {
            return;
        }
        self.ends = self.ends.route_stage(last);
        if let OutputEnd::Buffer(id) = self.ends.output {
            // A stage's reader must see only what its writer produced.
            self.buffers[id.index()].clear();
        }
        debug!("stage routed: {:?}", self.ends);
    }

    /// Swap the working input to the buffer the last stage wrote. No-op while closed.
    pub fn advance_stage(&mut self) {
        if self.opened {
            self.ends = self.ends.advance_stage();
        }
    }

    /// Write bytes to the working output.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), PipeError> {
        let output = if self.opened {
            self.ends.output
        } else {
            OutputEnd::Stdout
        };
        match output {
            OutputEnd::Buffer(id) => {
                self.buffers[id.index()].stream.borrow_mut().write_all(data)?
            }
            OutputEnd::Stdout => match self.streams.stdout.as_mut() {
                Some(stdout) => stdout.write_all(data)?,
                None => return Err(PipeError::Closed),
            },
            OutputEnd::Closed => return Err(PipeError::Closed),
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.streams.stdout.as_mut() {
            Some(stdout) => stdout.flush(),
            None => Ok(()),
        }
    }

    /// Write to the real stderr; never enters a pipe.
    pub fn write_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        self.streams.stderr.write_all(data)?;
        self.streams.stderr.flush()
    }

    /// Report a line-level or command error on stderr.
    pub fn report(&mut self, message: &str) {
        if let Err(err) = self.write_stderr(format!("{message}\n").as_bytes()) {
            log::error!("failed to report {message:?}: {err}");
        }
    }

    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        self.with_input(read_line_from)
    }

    pub fn read_token(&mut self) -> io::Result<Option<String>> {
        self.with_input(read_token_from)
    }

    /// Read everything left on the working input.
    pub fn read_to_string(&mut self) -> io::Result<String> {
        self.with_input(|input| {
            let mut buf = Vec::new();
            input.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
    }

    fn with_input<T>(
        &mut self,
        f: impl FnOnce(&mut dyn BufRead) -> io::Result<T>,
    ) -> io::Result<T> {
        let input = if self.opened {
            self.ends.input
        } else {
            InputEnd::Stdin
        };
        match input {
            InputEnd::Stdin => f(&mut *self.streams.stdin),
            InputEnd::Buffer(id) => f(&mut *self.buffers[id.index()].stream.borrow_mut()),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(StdStreams::inherit())
    }
}

/// An open pipeline that is closed again when dropped.
///
/// Closing happens on every exit path, including an early return when a
/// command terminates the session and unwinding from a panic.
pub struct OpenPipeline<'a>(&'a mut Pipeline);

impl<'a> OpenPipeline<'a> {
    pub fn new(pipeline: &'a mut Pipeline) -> Self {
        pipeline.open();
        Self(pipeline)
    }
}

impl Deref for OpenPipeline<'_> {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        self.0
    }
}

impl DerefMut for OpenPipeline<'_> {
    fn deref_mut(&mut self) -> &mut Pipeline {
        self.0
    }
}

impl Drop for OpenPipeline<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}
