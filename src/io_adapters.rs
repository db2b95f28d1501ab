use std::cell::RefCell;
use std::io::{self, BufRead, Read, Result as IoResult, Write};
use std::rc::Rc;

/// Memory-backed byte stream that is written at the back and read from the front.
///
/// Used as a pipe buffer between two stages: the writer appends, the reader
/// consumes. Reading past the written data reports end of input.
#[derive(Debug, Default)]
pub struct MemPipe {
    data: Vec<u8>,
    pos: usize,
}

impl MemPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all content, read or unread. Keeps the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Bytes written but not yet read.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.unread().is_empty()
    }
}

impl Read for MemPipe {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        let n = self.unread().len().min(out.len());
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl BufRead for MemPipe {
    fn fill_buf(&mut self) -> IoResult<&[u8]> {
        Ok(&self.data[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.data.len());
    }
}

impl Write for MemPipe {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Memory-backed writer for capturing output.
///
/// Clones share the same storage, so the caller can keep a handle and read
/// the collected bytes after the writer has been moved into a shell.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: create writer and return (writer, handle).
    pub fn with_handle() -> (Self, Self) {
        let writer = Self::new();
        let handle = writer.clone();
        (writer, handle)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.borrow().clone()
    }

    /// Collected bytes as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// The process-level streams a shell falls back to outside of pipes.
///
/// `stdout` is optional: without it, unpiped output has nowhere to go and
/// writing fails instead of being silently discarded.
pub struct StdStreams {
    pub stdin: Box<dyn BufRead>,
    pub stdout: Option<Box<dyn Write>>,
    pub stderr: Box<dyn Write>,
}

impl StdStreams {
    /// Streams of the current process.
    pub fn inherit() -> Self {
        Self {
            stdin: Box::new(io::stdin().lock()),
            stdout: Some(Box::new(io::stdout())),
            stderr: Box::new(io::stderr()),
        }
    }

    pub fn new(
        stdin: impl BufRead + 'static,
        stdout: Option<Box<dyn Write>>,
        stderr: impl Write + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout,
            stderr: Box::new(stderr),
        }
    }
}

impl Default for StdStreams {
    fn default() -> Self {
        Self::inherit()
    }
}

/// Read one line without its terminator. `None` at end of input.
pub fn read_line_from(reader: &mut dyn BufRead) -> IoResult<Option<String>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Read one whitespace-delimited token, skipping leading whitespace.
///
/// The delimiter after the token is left in the stream. `None` when only
/// whitespace remains.
pub fn read_token_from(reader: &mut dyn BufRead) -> IoResult<Option<String>> {
    let mut token = Vec::new();
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                break;
            }
            let mut consumed = 0;
            let mut done = false;
            for &byte in available {
                if byte.is_ascii_whitespace() {
                    if !token.is_empty() {
                        done = true;
                        break;
                    }
                } else {
                    token.push(byte);
                }
                consumed += 1;
            }
            (consumed, done)
        };
        reader.consume(consumed);
        if done {
            break;
        }
    }

    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }
}
