//! Client connection handles.
//!
//! Each TCP connection gets a writer task owning the socket's write half;
//! everything else talks to it through a cloneable [`ConnectionHandle`].
//! The handle does not keep the connection alive: when the reader task
//! ends, the writer drains and closes regardless of handles still held by
//! entities.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::debug;

use flyagain_protocol::Frame;

#[derive(Debug)]
enum WriterMsg {
    Data(Bytes),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: u64,
    tx: mpsc::UnboundedSender<WriterMsg>,
}

impl ConnectionHandle {
    /// Spawn the writer task for an accepted connection.
    pub fn spawn_writer(conn_id: u64, mut write_half: OwnedWriteHalf) -> ConnectionHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WriterMsg::Data(bytes) => {
                        if let Err(e) = write_half.write_all(&bytes).await {
                            debug!(conn_id, error = %e, "write failed, stopping writer");
                            break;
                        }
                    }
                    WriterMsg::Shutdown => break,
                }
            }
            let _ = write_half.shutdown().await;
        });
        ConnectionHandle { conn_id, tx }
    }

    /// Queue one frame. Errors mean the writer is gone; the disconnect
    /// path will clean the entity up, so sends are fire-and-forget.
    pub fn send_frame(&self, frame: &Frame) {
        let mut buf = BytesMut::new();
        frame.write_to(&mut buf);
        let _ = self.tx.send(WriterMsg::Data(buf.freeze()));
    }

    /// Queue an already-framed batch (the per-tick coalesced write).
    pub fn send_bytes(&self, bytes: Bytes) {
        let _ = self.tx.send(WriterMsg::Data(bytes));
    }

    pub fn close(&self) {
        let _ = self.tx.send(WriterMsg::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Handle wired to a plain channel instead of a socket, for tests.
    pub fn new_for_test() -> (ConnectionHandle, TestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle { conn_id: 0, tx }, TestReceiver { rx })
    }
}

/// Receiving end of a test handle: yields the raw bytes a client would see.
pub struct TestReceiver {
    rx: mpsc::UnboundedReceiver<WriterMsg>,
}

impl TestReceiver {
    /// Drain everything queued so far and decode it back into frames.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        use tokio_util::codec::Decoder;

        let mut buf = BytesMut::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let WriterMsg::Data(bytes) = msg {
                buf.extend_from_slice(&bytes);
            }
        }

        let mut codec = flyagain_protocol::FrameCodec::default();
        let mut frames = Vec::new();
        while let Ok(Some(event)) = codec.decode(&mut buf) {
            if let flyagain_protocol::FrameEvent::Frame(frame) = event {
                frames.push(frame);
            }
        }
        frames
    }
}
