//! Host side of the KeyFlight device link.
//!
//! Layers, leaf-first:
//! - [`CommandChannel`]: decodes incoming chunks into [`ChannelEvent`]s and
//!   sends commands over a [`keyflight_transport::ByteStream`]
//! - [`LinkSession`]: open, boot settle, handshake, event forwarding, close
//! - [`upload_configuration`]: the paced reset/set/save sequence
//! - [`read_configuration`]: the device's stored configuration

pub mod channel;
pub mod error;
pub mod events;
pub mod handshake;
pub mod modules;
pub mod readback;
pub mod session;
pub mod upload;

#[cfg(test)]
mod testing;

pub use channel::{ChannelEvent, CommandChannel, ErrorSource};
pub use error::{LinkError, Result};
pub use events::{Dispatcher, Subscription};
pub use handshake::{DeviceIdentity, DEFAULT_MAX_MODULES};
pub use modules::{DeviceConfiguration, InputKind, InputModule, MAX_MODULES, MAX_PIN};
pub use readback::{read_configuration, ModuleSummary, CONFIG_SENT_ACK};
pub use session::{LinkSession, SessionConfig, SessionEvent, SessionState};
pub use upload::{
    plan_upload, upload_configuration, validate_upload, CommandSink, UploadConfig, UploadStep,
    UploadSummary,
};
