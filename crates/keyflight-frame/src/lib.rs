//! Delimiter-framed command protocol for KeyFlight devices.
//!
//! Every message on the wire is ASCII text of the form:
//! - a decimal command id
//! - zero or more arguments, each preceded by `,`
//! - a terminating `;` (followed by the transport's line terminator)
//!
//! There is no escaping: arguments must not contain `,` or `;`.
//! Reassembly across arbitrary chunk boundaries happens in [`FrameDecoder`].

pub mod codec;
pub mod command;
pub mod decoder;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_command, Command, FrameConfig, COMMAND_SEPARATOR, FIELD_SEPARATOR,
};
pub use command::CommandId;
pub use decoder::FrameDecoder;
pub use error::{FrameError, Result};
pub use reader::CommandReader;
pub use writer::{CommandWriter, DEFAULT_TERMINATOR};

#[cfg(feature = "async")]
pub use async_codec::CommandCodec;
