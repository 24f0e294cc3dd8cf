//! `tokio_util` codec for async transports.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_command, Command};
use crate::decoder::split_frame;
use crate::error::FrameError;
use crate::writer::DEFAULT_TERMINATOR;

/// Frames commands over any `AsyncRead`/`AsyncWrite`.
///
/// Items are per-frame results: a malformed frame surfaces as `Some(Err(_))`
/// while the stream keeps going, the same way the blocking reader behaves.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    scanned: usize,
    terminator: String,
}

impl CommandCodec {
    /// Codec terminating outgoing commands with `"\n"`.
    pub fn new() -> Self {
        Self::with_terminator(DEFAULT_TERMINATOR)
    }

    /// Codec with an explicit outgoing line terminator.
    pub fn with_terminator(terminator: impl Into<String>) -> Self {
        Self {
            scanned: 0,
            terminator: terminator.into(),
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = std::result::Result<Command, FrameError>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(split_frame(src, &mut self.scanned).map(|frame| decode_frame(&frame)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            self.scanned = 0;
            return Ok(None);
        }
        Err(FrameError::ConnectionClosed)
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_command(&item, &self.terminator, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::command::CommandId;

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, CommandCodec::new());
        let mut stream = FramedRead::new(server, CommandCodec::new());

        sink.send(Command::bare(CommandId::STATUS)).await.unwrap();
        sink.send(Command::new(CommandId::SET_KEY, ["2", "ALT+TAB"]))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first, Command::bare(CommandId::STATUS));
        assert_eq!(second.args, vec!["2", "ALT+TAB"]);
    }

    #[tokio::test]
    async fn malformed_frame_is_an_item_not_the_end() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, CommandCodec::new());

        client.write_all(b"oops;10,done;\n").await.unwrap();
        drop(client);

        let bad = stream.next().await.unwrap().unwrap();
        assert!(matches!(bad, Err(FrameError::InvalidCommandId(_))));
        let good = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(good.id, CommandId::ACK);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_reported() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, CommandCodec::new());

        client.write_all(b"1,Board").await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn encoder_uses_terminator() {
        let mut codec = CommandCodec::with_terminator("\r\n");
        let mut dst = BytesMut::new();
        codec.encode(Command::bare(CommandId::SAVE_CONFIG), &mut dst).unwrap();
        assert_eq!(dst.as_ref(), b"9;\r\n");
    }
}
