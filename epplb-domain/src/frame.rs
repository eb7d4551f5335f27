//! Wire framing for EPP over TCP (RFC 5734).
//!
//! Every message on both the downstream and upstream legs is a single
//! frame:
//!
//! ```text
//! +---------------------+-----------------------------------+
//! | total_len (u32, BE) | payload (total_len - 4 bytes)     |
//! +---------------------+-----------------------------------+
//!        4 bytes                 XML document
//! ```
//!
//! `total_len` counts the 4 header bytes themselves. One frame is read or
//! written per call; callers serialize concurrent use of a stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ---

use super::error::{EppError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Header size in bytes.
pub(crate) const HEADER_LEN: usize = 4;

/// Upper bound on `total_len`. Larger headers are rejected before the
/// payload buffer is allocated.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One length-prefixed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    // ---
    payload: Bytes,
}

// ---

impl Frame {
    // ---
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Header value for this frame: payload length plus the header itself.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + HEADER_LEN
    }
}

// ---------------------------------------------------------------------------
// read_frame
// ---------------------------------------------------------------------------

/// Read exactly one frame from `stream`.
///
/// Returns [`EppError::Disconnected`] only when the peer closed before the
/// first header byte. Any later short read is an [`EppError::Io`] with
/// `UnexpectedEof`.
pub async fn read_frame<R>(stream: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];

    // Peek at the first byte to distinguish clean EOF from a truncated header.
    if stream.read(&mut header[..1]).await? == 0 {
        return Err(EppError::Disconnected);
    }
    stream.read_exact(&mut header[1..]).await?;

    let total_len = u32::from_be_bytes(header);
    if (total_len as usize) < HEADER_LEN {
        return Err(EppError::InvalidFrameLength(total_len));
    }
    if total_len as usize > MAX_FRAME_LEN {
        return Err(EppError::FrameTooLarge {
            max: MAX_FRAME_LEN,
            got: total_len as usize,
        });
    }

    let mut payload = vec![0u8; total_len as usize - HEADER_LEN];
    stream.read_exact(&mut payload).await?;

    Ok(Frame::new(payload))
}

// ---------------------------------------------------------------------------
// write_frame
// ---------------------------------------------------------------------------

/// Write `frame` to `stream` and flush it.
pub async fn write_frame<W>(stream: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_len = u32::try_from(frame.wire_len()).map_err(|_| EppError::FrameTooLarge {
        max: MAX_FRAME_LEN,
        got: frame.wire_len(),
    })?;

    stream.write_all(&total_len.to_be_bytes()).await?;
    stream.write_all(frame.payload()).await?;
    stream.flush().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::io::Cursor;

    use super::*;

    const HELLO: &[u8] = br#"<?xml version="1.0"?><epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><hello/></epp>"#;

    // ---

    #[tokio::test]
    async fn loopback_preserves_payload_and_header() {
        // ---
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, &Frame::new(HELLO)).await.unwrap();
        let frame = read_frame(&mut b).await.unwrap();

        assert_eq!(frame.payload().as_ref(), HELLO);
        assert_eq!(frame.wire_len(), HELLO.len() + 4);
    }

    // ---

    #[tokio::test]
    async fn header_counts_itself() {
        // ---
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, &Frame::new(&b"abc"[..])).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 7, b'a', b'b', b'c']);
    }

    // ---

    #[tokio::test]
    async fn clean_eof_is_disconnected() {
        // ---
        let mut reader = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, EppError::Disconnected));
    }

    // ---

    #[tokio::test]
    async fn truncated_payload_is_io_error() {
        // ---
        let mut reader = Cursor::new(vec![0, 0, 0, 10, b'x', b'y']);
        let err = read_frame(&mut reader).await.unwrap_err();
        match err {
            EppError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {other:?}"),
        }
    }

    // ---

    #[tokio::test]
    async fn truncated_header_is_io_error() {
        // ---
        let mut reader = Cursor::new(vec![0, 0]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, EppError::Io(_)));
    }

    // ---

    #[tokio::test]
    async fn bad_lengths_rejected() {
        // ---
        let mut reader = Cursor::new(vec![0, 0, 0, 3]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, EppError::InvalidFrameLength(3)));

        let mut reader = Cursor::new(vec![0x7F, 0xFF, 0xFF, 0xFF]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, EppError::FrameTooLarge { .. }));
    }

    // ---

    #[tokio::test]
    async fn empty_payload_frame() {
        // ---
        let mut reader = Cursor::new(vec![0, 0, 0, 4]);
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(frame.payload().is_empty());
    }
}
