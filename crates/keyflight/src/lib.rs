//! Host-side link to KeyFlight input controllers.
//!
//! A KeyFlight controller is an Arduino-class board that turns buttons,
//! encoders, switches and analog inputs into key commands. The host talks to
//! it over a serial line using short text commands (`<id>[,<arg>]*;`).
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex byte streams (serial ports, in-memory pairs)
//! - [`frame`]: command framing, the blocking reader/writer and the async codec
//! - [`link`]: command channel, session lifecycle, configuration upload

/// Re-export transport types.
pub mod transport {
    pub use keyflight_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use keyflight_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use keyflight_link::*;
}
