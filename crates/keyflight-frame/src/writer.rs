use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_command, Command};
use crate::command::CommandId;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 128;

/// Line terminator appended after every command unless overridden.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Writes complete commands to any `Write` stream.
pub struct CommandWriter<T> {
    inner: T,
    buf: BytesMut,
    terminator: String,
}

impl<T: Write> CommandWriter<T> {
    /// Create a new command writer terminating each command with `"\n"`.
    pub fn new(inner: T) -> Self {
        Self::with_terminator(inner, DEFAULT_TERMINATOR)
    }

    /// Create a new command writer with an explicit line terminator.
    pub fn with_terminator(inner: T, terminator: impl Into<String>) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            terminator: terminator.into(),
        }
    }

    /// Write a complete command (blocking).
    pub fn write_command(&mut self, command: &Command) -> Result<()> {
        self.buf.clear();
        encode_command(command, &self.terminator, &mut self.buf);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Encode and send a command from its id and arguments.
    pub fn send<S: AsRef<str>>(&mut self, id: CommandId, args: &[S]) -> Result<()> {
        let command = Command::new(id, args.iter().map(|a| a.as_ref().to_string()));
        self.write_command(&command)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Line terminator appended after each command.
    pub fn terminator(&self) -> &str {
        &self.terminator
    }
}
