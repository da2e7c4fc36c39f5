//! Writing half of a framed connection.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// Writes length prefixed frames, reusing one scratch buffer for the frame header and any
/// serialized control data.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            scratch: Vec::new(),
        }
    }

    /// Frames and writes `msg`, flushing the writer afterwards.
    ///
    /// Numeric payloads are written straight from the caller's slice after the header.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// An `InvalidInput` error if the frame would exceed `MAX_FRAME_LEN`, or the writer's error.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { scratch, tx } = self;

        scratch.clear();
        scratch.resize(LEN_TYPE_SIZE, 0);

        let tail = msg.serialize(scratch)?;
        let frame_len = scratch.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);

        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {frame_len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        scratch[..LEN_TYPE_SIZE].copy_from_slice(&(frame_len as LenType).to_be_bytes());
        tx.write_all(scratch).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }

    /// Shuts down the writing half, signaling end of stream to the peer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
