//! Frame-level transport adapter over a TLS byte stream (spec.md §1 "Out of
//! scope": the TLS/TCP layer is a bidirectional byte stream producer/
//! consumer; this is the thin glue that turns it into whole [`Frame`]s).

use crate::error::FrameDecodeError;
use crate::frame::{Frame, FrameHeader, FRAME_HEADER_LEN};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::client::TlsStream;

pub struct Socket {
    stream: TlsStream<tokio::net::TcpStream>,
    read_buf: BytesMut,
}

impl Socket {
    pub fn new(stream: TlsStream<tokio::net::TcpStream>) -> Self {
        Self { stream, read_buf: BytesMut::with_capacity(16 * 1024) }
    }

    pub async fn write_preface(&mut self) -> anyhow::Result<()> {
        self.stream.write_all(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n").await?;
        Ok(())
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let mut out = BytesMut::new();
        frame.write_into(&mut out);
        self.stream.write_all(&out).await?;
        Ok(())
    }

    /// Reads the next whole frame, parsing as a client (`client_parity_required = false`).
    pub async fn read_frame(&mut self) -> anyhow::Result<Frame> {
        while self.read_buf.len() < FRAME_HEADER_LEN {
            self.fill().await?;
        }
        let header = FrameHeader::parse(&self.read_buf[..FRAME_HEADER_LEN])?;
        let total = FRAME_HEADER_LEN + header.length as usize;
        while self.read_buf.len() < total {
            self.fill().await?;
        }
        self.read_buf.advance(FRAME_HEADER_LEN);
        let payload: Bytes = self.read_buf.split_to(header.length as usize).freeze();
        Ok(Frame::parse(header, payload, false)?)
    }

    async fn fill(&mut self) -> anyhow::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!(FrameDecodeError::PayloadTooShort);
        }
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}
