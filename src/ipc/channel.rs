//! Message channel endpoints.
//!
//! Any byte stream works as a channel: the worker talks over its stdin and
//! stdout, the supervisor over the child's pipes.  [`memory_pair`] joins two
//! endpoints inside one process and still goes through the frame codec.
//!
//! Delivery is in order on one connection.  `recv` blocks with no timeout.

use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;

use crate::error::{Error, ProtocolError, Result};

use super::IpcMessage;
use super::codec::{FrameDecoder, decode_message, encode_message};

/// Outbound half of a channel.
pub trait MessageSink: Send {
    fn send(&mut self, msg: &IpcMessage) -> Result<()>;
}

/// Inbound half of a channel.
pub trait MessageSource: Send {
    /// Block until the next message arrives.  A closed channel is
    /// [`ProtocolError::Disconnected`].
    fn recv(&mut self) -> Result<IpcMessage>;
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn send(&mut self, msg: &IpcMessage) -> Result<()> {
        (**self).send(msg)
    }
}

impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    fn recv(&mut self) -> Result<IpcMessage> {
        (**self).recv()
    }
}

fn io_to_protocol(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset => {
            ProtocolError::Disconnected.into()
        }
        _ => Error::Io(e),
    }
}

// ── Byte streams ──────────────────────────────────────────────

/// Writes framed messages to any `Write`.
pub struct StreamSink<W> {
    writer: W,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> MessageSink for StreamSink<W> {
    fn send(&mut self, msg: &IpcMessage) -> Result<()> {
        let frame = encode_message(msg)?;
        self.writer.write_all(&frame).map_err(io_to_protocol)?;
        self.writer.flush().map_err(io_to_protocol)
    }
}

/// Reads framed messages from any `Read`.
pub struct StreamSource<R> {
    reader: R,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            buf: vec![0; 4096],
        }
    }
}

impl<R: Read + Send> MessageSource for StreamSource<R> {
    fn recv(&mut self) -> Result<IpcMessage> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return decode_message(&frame);
            }
            let n = match self.reader.read(&mut self.buf) {
                Ok(0) => return Err(ProtocolError::Disconnected.into()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_to_protocol(e)),
            };
            self.decoder.feed(&self.buf[..n])?;
        }
    }
}

// ── In-process pair ───────────────────────────────────────────

pub struct MemorySink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl MessageSink for MemorySink {
    fn send(&mut self, msg: &IpcMessage) -> Result<()> {
        let frame = encode_message(msg)?;
        self.tx
            .send(frame)
            .map_err(|_| ProtocolError::Disconnected.into())
    }
}

pub struct MemorySource {
    rx: mpsc::Receiver<Vec<u8>>,
    decoder: FrameDecoder,
}

impl MessageSource for MemorySource {
    fn recv(&mut self) -> Result<IpcMessage> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return decode_message(&frame);
            }
            let bytes = self.rx.recv().map_err(|_| ProtocolError::Disconnected)?;
            self.decoder.feed(&bytes)?;
        }
    }
}

/// One side of a [`memory_pair`].
pub struct MemoryEndpoint {
    pub sink: MemorySink,
    pub source: MemorySource,
}

/// Two connected endpoints: what one sends the other receives.
pub fn memory_pair() -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let endpoint = |tx, rx| MemoryEndpoint {
        sink: MemorySink { tx },
        source: MemorySource {
            rx,
            decoder: FrameDecoder::new(),
        },
    };
    (endpoint(a_tx, a_rx), endpoint(b_tx, b_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::ControlSettingName;

    #[test]
    fn memory_pair_delivers_in_order() {
        let (mut a, mut b) = memory_pair();
        a.sink.send(&IpcMessage::start()).unwrap();
        a.sink
            .send(&IpcMessage::get_control(ControlSettingName::Pip))
            .unwrap();
        assert_eq!(b.source.recv().unwrap(), IpcMessage::start());
        assert_eq!(
            b.source.recv().unwrap(),
            IpcMessage::get_control(ControlSettingName::Pip)
        );

        b.sink.send(&IpcMessage::stop()).unwrap();
        assert_eq!(a.source.recv().unwrap(), IpcMessage::stop());
    }

    #[test]
    fn dropped_peer_reads_as_disconnected() {
        let (a, mut b) = memory_pair();
        drop(a);
        assert!(matches!(
            b.source.recv(),
            Err(Error::Protocol(ProtocolError::Disconnected))
        ));
        assert!(matches!(
            b.sink.send(&IpcMessage::start()),
            Err(Error::Protocol(ProtocolError::Disconnected))
        ));
    }

    #[test]
    fn stream_source_reads_what_stream_sink_wrote() {
        let mut sink = StreamSink::new(Vec::new());
        sink.send(&IpcMessage::start()).unwrap();
        sink.send(&IpcMessage::stop()).unwrap();

        let mut source = StreamSource::new(std::io::Cursor::new(sink.writer));
        assert_eq!(source.recv().unwrap(), IpcMessage::start());
        assert_eq!(source.recv().unwrap(), IpcMessage::stop());
        assert!(matches!(
            source.recv(),
            Err(Error::Protocol(ProtocolError::Disconnected))
        ));
    }

    #[test]
    fn truncated_stream_is_a_disconnect() {
        let mut sink = StreamSink::new(Vec::new());
        sink.send(&IpcMessage::start()).unwrap();
        let mut bytes = sink.writer;
        bytes.pop();
        let mut source = StreamSource::new(std::io::Cursor::new(bytes));
        assert!(matches!(
            source.recv(),
            Err(Error::Protocol(ProtocolError::Disconnected))
        ));
    }
}
