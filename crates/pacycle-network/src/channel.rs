//! Message channel over one duplex byte connection.
//!
//! Every message is one frame terminated by `\n`. Chunks are compact JSON,
//! which never contains a raw newline, and control strings are single
//! words, so the delimiter never appears inside a frame body. A transport
//! read is never assumed to hold exactly one message.
//!
//! The channel splits into a [`ChannelReader`] owned by whoever drives
//! `receive()` and a cloneable [`ChannelWriter`]. Each `send` writes one
//! whole frame under the writer lock, so concurrent senders never
//! interleave partial messages.

use std::sync::Arc;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use pacycle_protocol::{ProtocolError, WireMessage, FRAME_DELIMITER, MAX_FRAME_LEN};

use crate::NetworkError;

/// Outcome of one successful `receive()`.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(WireMessage),
    /// Remote closed the connection or the read side failed.
    Closed,
}

/// Read half: reassembles frames from arbitrary transport reads.
pub struct ChannelReader<R> {
    inner: BufReader<R>,
    frame: Vec<u8>,
    /// Set while skipping the remainder of an oversize frame.
    discarding: bool,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> ChannelReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_frame_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            frame: Vec::new(),
            discarding: false,
            max_frame_len,
        }
    }

    /// Suspend until one complete message is available.
    ///
    /// A frame that cannot be decoded, or that exceeds the size limit, is
    /// reported as `Err(ProtocolError)`; the channel stays usable and the
    /// next call continues with the following frame.
    pub async fn receive(&mut self) -> Result<Received, ProtocolError> {
        loop {
            let available = match self.inner.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    tracing::debug!(error = %e, "Channel read failed");
                    return Ok(Received::Closed);
                }
            };

            if available.is_empty() {
                if !self.frame.is_empty() {
                    tracing::debug!(
                        bytes = self.frame.len(),
                        "Dropping unterminated frame at end of stream"
                    );
                    self.frame.clear();
                }
                return Ok(Received::Closed);
            }

            match available.iter().position(|b| *b == FRAME_DELIMITER) {
                Some(pos) => {
                    let overflow = self.discarding || self.frame.len() + pos > self.max_frame_len;
                    if !overflow {
                        self.frame.extend_from_slice(&available[..pos]);
                    }
                    self.inner.consume(pos + 1);

                    let body = std::mem::take(&mut self.frame);
                    if overflow {
                        self.discarding = false;
                        return Err(ProtocolError::FrameTooLong {
                            limit: self.max_frame_len,
                        });
                    }
                    if body.is_empty() {
                        continue;
                    }
                    return WireMessage::decode(&body).map(Received::Message);
                }
                None => {
                    let len = available.len();
                    if !self.discarding {
                        if self.frame.len() + len > self.max_frame_len {
                            self.discarding = true;
                            self.frame.clear();
                        } else {
                            self.frame.extend_from_slice(available);
                        }
                    }
                    self.inner.consume(len);
                }
            }
        }
    }
}

/// Write half. Clones share the same underlying writer.
pub struct ChannelWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for ChannelWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin> ChannelWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one framed message.
    pub async fn send(&self, message: &WireMessage) -> Result<(), NetworkError> {
        let mut frame = message.encode()?;
        frame.push(FRAME_DELIMITER);

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write side. Further sends fail.
    pub async fn close(&self) -> Result<(), NetworkError> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// One peer connection as a message channel.
pub struct MessageChannel<R, W> {
    reader: ChannelReader<R>,
    writer: ChannelWriter<W>,
}

pub type TcpChannel = MessageChannel<OwnedReadHalf, OwnedWriteHalf>;

impl TcpChannel {
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not set TCP_NODELAY");
        }
        let (read, write) = stream.into_split();
        Self::from_parts(read, write)
    }
}

impl<S: AsyncRead + AsyncWrite> MessageChannel<ReadHalf<S>, WriteHalf<S>> {
    /// Wrap any duplex stream, e.g. `tokio::io::duplex` in tests.
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(read, write)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> MessageChannel<R, W> {
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: ChannelReader::new(reader),
            writer: ChannelWriter::new(writer),
        }
    }

    pub async fn send(&self, message: &WireMessage) -> Result<(), NetworkError> {
        self.writer.send(message).await
    }

    pub async fn receive(&mut self) -> Result<Received, ProtocolError> {
        self.reader.receive().await
    }

    pub fn writer(&self) -> ChannelWriter<W> {
        self.writer.clone()
    }

    pub fn into_split(self) -> (ChannelReader<R>, ChannelWriter<W>) {
        (self.reader, self.writer)
    }
}
