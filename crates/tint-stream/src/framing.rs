//! Length-prefixed framing for async byte streams.
//!
//! Each frame is a 4-byte little-endian length followed by one
//! postcard-encoded [`Message`]. Generic over the transport: anything
//! `AsyncRead + AsyncWrite + Unpin` works: TCP, TLS-wrapped TCP, or an
//! in-memory duplex in tests.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tint_wire::Message;

const FRAME_LEN_PREFIX_SIZE: usize = 4;
const RECV_BUF_COMPACT_THRESHOLD: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 4096;

fn compact_recv_buffer(buf: &mut Vec<u8>, unread_start: &mut usize) {
    if *unread_start == buf.len() {
        buf.clear();
        *unread_start = 0;
        return;
    }

    if *unread_start >= RECV_BUF_COMPACT_THRESHOLD && *unread_start >= buf.len() / 2 {
        buf.drain(..*unread_start);
        *unread_start = 0;
    }
}

fn try_decode_one_from_buffer(
    buf: &mut Vec<u8>,
    unread_start: &mut usize,
) -> io::Result<Option<Message>> {
    let unread = &buf[*unread_start..];
    if unread.len() < FRAME_LEN_PREFIX_SIZE {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([unread[0], unread[1], unread[2], unread[3]]) as usize;
    let frame_end = *unread_start + FRAME_LEN_PREFIX_SIZE + frame_len;
    if frame_end > buf.len() {
        return Ok(None);
    }

    let frame_start = *unread_start + FRAME_LEN_PREFIX_SIZE;
    let decoded = postcard::from_bytes::<Message>(&buf[frame_start..frame_end]);

    *unread_start = frame_end;
    compact_recv_buffer(buf, unread_start);

    match decoded {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("postcard: {e}"),
        )),
    }
}

/// A length-prefixed framed connection over an async byte stream.
pub struct LengthPrefixedFramed<S> {
    stream: S,
    buf: Vec<u8>,
    unread_start: usize,
}

impl<S> LengthPrefixedFramed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            unread_start: 0,
        }
    }

    /// Consume the framed wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> LengthPrefixedFramed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one message, prefixed with its encoded length.
    pub async fn send(&mut self, msg: &Message) -> io::Result<()> {
        let body = postcard::to_allocvec(msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let frame_len = u32::try_from(body.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "message too large for u32 length prefix",
            )
        })?;

        self.stream.write_all(&frame_len.to_le_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one message. `Ok(None)` means the peer closed cleanly between
    /// frames; EOF inside a frame is an `UnexpectedEof` error.
    pub async fn recv(&mut self) -> io::Result<Option<Message>> {
        loop {
            if let Some(msg) = try_decode_one_from_buffer(&mut self.buf, &mut self.unread_start)? {
                return Ok(Some(msg));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                let trailing = self.buf.len().saturating_sub(self.unread_start);
                if trailing != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {trailing} trailing bytes and no complete frame"),
                    ));
                }
                return Ok(None);
            }
            compact_recv_buffer(&mut self.buf, &mut self.unread_start);
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Receive with a timeout. `Ok(None)` if nothing arrived in time.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .unwrap_or(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tint_wire::Metadata;

    fn request(request_id: u64) -> Message {
        Message::Request {
            request_id,
            method_id: 42,
            metadata: Metadata::new(),
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = LengthPrefixedFramed::new(a);
        let mut right = LengthPrefixedFramed::new(b);

        left.send(&request(1)).await.unwrap();
        let got = right.recv().await.unwrap().unwrap();
        assert_eq!(got, request(1));
    }

    #[tokio::test]
    async fn multiple_frames_in_flight() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut left = LengthPrefixedFramed::new(a);
        let mut right = LengthPrefixedFramed::new(b);

        for id in 1..=10 {
            left.send(&request(id)).await.unwrap();
        }
        for id in 1..=10 {
            assert_eq!(right.recv().await.unwrap().unwrap(), request(id));
        }
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = LengthPrefixedFramed::new(a);
        let mut right = LengthPrefixedFramed::new(b);

        left.send(&request(1)).await.unwrap();
        drop(left);

        assert!(right.recv().await.unwrap().is_some());
        assert!(right.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let (a, b) = tokio::io::duplex(1024);
        let mut right = LengthPrefixedFramed::new(b);

        // A frame header promising more bytes than will ever arrive.
        let mut half_open = a;
        half_open.write_all(&100u32.to_le_bytes()).await.unwrap();
        half_open.write_all(&[0u8; 10]).await.unwrap();
        drop(half_open);

        let err = right.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn garbage_frame_is_invalid_data() {
        let (a, b) = tokio::io::duplex(1024);
        let mut right = LengthPrefixedFramed::new(b);

        let mut raw = a;
        raw.write_all(&4u32.to_le_bytes()).await.unwrap();
        raw.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let err = right.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn recv_timeout_yields_none_when_idle() {
        let (a, b) = tokio::io::duplex(1024);
        let _keep_open = a;
        let mut right = LengthPrefixedFramed::new(b);

        let got = right
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }
}
