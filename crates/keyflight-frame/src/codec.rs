use std::fmt;

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::command::CommandId;
use crate::error::{FrameError, Result};

/// Separates the id and the arguments of one command.
pub const FIELD_SEPARATOR: char = ',';

/// Terminates one command.
pub const COMMAND_SEPARATOR: char = ';';

/// A decoded protocol command: id plus ordered string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command identifier.
    pub id: CommandId,
    /// Arguments in wire order, verbatim (empty strings included).
    pub args: Vec<String>,
}

impl Command {
    /// Create a command with arguments.
    pub fn new<I, S>(id: CommandId, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a command without arguments.
    pub fn bare(id: CommandId) -> Self {
        Self {
            id,
            args: Vec::new(),
        }
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Arguments joined with single spaces (debug and error text).
    pub fn text(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Display for Command {
    /// Wire form without the line terminator, e.g. `5,3,ENCODER,5,6;`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id.value())?;
        for arg in &self.args {
            write!(f, "{FIELD_SEPARATOR}{arg}")?;
        }
        write!(f, "{COMMAND_SEPARATOR}")
    }
}

/// Encode a command into the wire format.
///
/// Wire format:
/// ```text
/// <id>[,<arg>]*;<terminator>
/// ```
///
/// Arguments are written verbatim. An argument holding a separator corrupts
/// framing on the far end; this is logged but not rejected.
pub fn encode_command(command: &Command, terminator: &str, dst: &mut BytesMut) {
    for (index, arg) in command.args.iter().enumerate() {
        if arg.contains([FIELD_SEPARATOR, COMMAND_SEPARATOR]) {
            warn!(
                id = command.id.value(),
                index,
                arg = %arg,
                "argument contains a protocol separator"
            );
        }
    }

    let wire = command.to_string();
    dst.reserve(wire.len() + terminator.len());
    dst.put_slice(wire.as_bytes());
    dst.put_slice(terminator.as_bytes());
}

/// Decode one complete frame (the text between two command separators).
///
/// The first field must parse as a non-negative integer id; the remaining
/// fields become the argument list.
pub fn decode_frame(frame: &str) -> Result<Command> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Err(FrameError::EmptyFrame);
    }

    let mut fields = frame.split(FIELD_SEPARATOR);
    let head = fields.next().unwrap_or_default();
    let id = head
        .trim()
        .parse::<u16>()
        .map_err(|_| FrameError::InvalidCommandId(head.to_string()))?;

    Ok(Command {
        id: CommandId(id),
        args: fields.map(str::to_string).collect(),
    })
}

/// Configuration for frame reassembly.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Maximum bytes held without seeing a command separator.
    /// `None` (the default) leaves the receive buffer unbounded.
    pub max_buffered: Option<usize>,
}
