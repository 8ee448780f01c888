use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::SinkExt;
use log::{info, warn};
use tokio::io::AsyncWrite;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use crate::error::{Error, Result};
use crate::pipeline::types::CompressedUnit;
use crate::protocol::FramePacketCodec;

/// Serializes units from concurrent producers into one ordered byte stream.
///
/// Building and writing a packet is one critical section under a single
/// exclusive lock, so packets from the two streams never interleave. A failed
/// write closes the sender for good; there is no retry or reconnection here.
pub struct TransportSender<W> {
    framed: Arc<Mutex<FramedWrite<W, FramePacketCodec>>>,
    closed: Arc<AtomicBool>,
}

impl<W> Clone for TransportSender<W> {
    fn clone(&self) -> Self {
        Self {
            framed: self.framed.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl TransportSender<TcpStream> {
    /// Connect to a listening consumer
    pub async fn connect(addr: impl ToSocketAddrs, codec: FramePacketCodec) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("connect failed: {}", e)))?;
        // frames are latency sensitive and already coalesced into one write
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("TransportSender: connected to {}", peer);
        }
        Ok(Self::new(stream, codec))
    }
}

impl<W> TransportSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, codec: FramePacketCodec) -> Self {
        Self {
            framed: Arc::new(Mutex::new(FramedWrite::new(writer, codec))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Packetize `unit` and write it whole.
    ///
    /// An oversized unit is rejected before any byte is written and leaves
    /// the connection usable. Any write failure is a `Connection` error.
    pub async fn send_unit(&self, unit: CompressedUnit) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection("transport closed".into()));
        }

        let mut framed = self.framed.lock().await;
        match framed.send(unit).await {
            Ok(()) => Ok(()),
            Err(Error::Protocol(violation)) => Err(Error::Protocol(violation)),
            Err(e) => {
                self.closed.store(true, Ordering::Release);
                warn!("TransportSender: write failed, closing: {}", e);
                Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    /// Flush and shut down the write half
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut framed = self.framed.lock().await;
        SinkExt::<CompressedUnit>::close(&mut *framed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{StreamKind, Timestamp};
    use crate::protocol::packet::decode_packet;
    use bytes::{Bytes, BytesMut};
    use tokio::io::AsyncReadExt;

    fn unit(kind: StreamKind, frame_number: u32, len: usize) -> CompressedUnit {
        let payload = Bytes::from(vec![frame_number as u8; len]);
        match kind {
            StreamKind::Rgb => {
                CompressedUnit::rgb(Timestamp::from_secs(0.1), frame_number, true, payload)
            }
            StreamKind::Depth => {
                CompressedUnit::depth(Timestamp::from_secs(0.1), frame_number, payload)
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_interleave() {
        let (client, mut server) = tokio::io::duplex(1024);
        let sender = TransportSender::new(client, FramePacketCodec::default());

        let rgb = sender.clone();
        let rgb_task = tokio::spawn(async move {
            for n in 0..50 {
                rgb.send_unit(unit(StreamKind::Rgb, n, 3000)).await.unwrap();
            }
        });
        let depth = sender.clone();
        let depth_task = tokio::spawn(async move {
            for n in 0..50 {
                depth.send_unit(unit(StreamKind::Depth, n, 700)).await.unwrap();
            }
        });

        let reader = tokio::spawn(async move {
            let mut raw = Vec::new();
            server.read_to_end(&mut raw).await.unwrap();
            raw
        });

        rgb_task.await.unwrap();
        depth_task.await.unwrap();
        sender.close().await.unwrap();
        drop(sender);

        let mut buf = BytesMut::from(&reader.await.unwrap()[..]);
        let mut next = [0u32; 2];
        let mut total = 0;
        while let Some(unit) = decode_packet(&mut buf, 1 << 20).unwrap() {
            let idx = unit.kind.index();
            assert_eq!(unit.frame_number, next[idx]);
            assert!(unit.payload.iter().all(|b| *b == unit.frame_number as u8));
            next[idx] += 1;
            total += 1;
        }
        assert!(buf.is_empty());
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn test_lost_peer_is_connection_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let sender = TransportSender::new(client, FramePacketCodec::default());
        let err = sender
            .send_unit(unit(StreamKind::Rgb, 0, 16))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send_unit(unit(StreamKind::Rgb, 1, 16)).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_unit_keeps_connection() {
        let (client, _server) = tokio::io::duplex(1024);
        let sender = TransportSender::new(client, FramePacketCodec::new(8));
        let err = sender
            .send_unit(unit(StreamKind::Depth, 0, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!sender.is_closed());
        sender.send_unit(unit(StreamKind::Depth, 1, 8)).await.unwrap();
    }
}
