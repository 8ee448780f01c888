use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::decoder::ColorDecoderFactory;
use crate::pipeline::receiver::coordinator::{ReceiverCoordinator, ReceiverOptions};
use crate::pipeline::receiver::FrameSink;

/// Accept connections until `cancel` fires, running one receiver pipeline
/// per connection. All connections deliver into the same sink.
pub async fn serve(
    addr: impl ToSocketAddrs,
    options: ReceiverOptions,
    factory: Arc<dyn ColorDecoderFactory>,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    serve_on(listener, options, factory, sink, cancel).await
}

/// Same as [`serve`] on an already bound listener
pub async fn serve_on(
    listener: TcpListener,
    options: ReceiverOptions,
    factory: Arc<dyn ColorDecoderFactory>,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    let mut connections = tokio::task::JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("{}: set_nodelay failed: {}", peer, e);
        }
        info!("{}: connected", peer);

        let coordinator = ReceiverCoordinator::new(options.clone(), factory.clone());
        let sink = sink.clone();
        let cancel = cancel.child_token();
        connections.spawn(async move {
            match coordinator.run(stream, sink, cancel).await {
                Ok(()) => info!("{}: closed ({})", peer, coordinator.health().summary()),
                Err(e) => error!("{}: connection failed: {:#}", peer, e),
            }
        });
    }

    info!("Listener stopping, waiting for {} connection(s)", connections.len());
    while connections.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::JpegDecoderFactory;
    use crate::depth::{DepthCodec, DepthFrame, DepthRange};
    use crate::net::TransportSender;
    use crate::pipeline::types::{ColorFrame, CompressedUnit, Timestamp};
    use crate::protocol::FramePacketCodec;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<(u32, f32)>);

    impl FrameSink for ChannelSink {
        fn on_color(&self, _frame: ColorFrame, _timestamp: Timestamp, _frame_number: u32) {}

        fn on_depth(&self, frame: DepthFrame, _timestamp: Timestamp, frame_number: u32) {
            let _ = self
                .0
                .send((frame_number, frame.depth_at(0, 0).unwrap_or(f32::NAN)));
        }
    }

    #[tokio::test]
    async fn test_depth_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(serve_on(
            listener,
            ReceiverOptions::default(),
            Arc::new(JpegDecoderFactory),
            Arc::new(ChannelSink(tx)),
            cancel.clone(),
        ));

        let sender = TransportSender::connect(addr, FramePacketCodec::default())
            .await
            .unwrap();
        let codec = DepthCodec::new(DepthRange::default());
        let payload = codec.encode_depth(&DepthFrame::filled(4, 4, 2.75)).unwrap();
        sender
            .send_unit(CompressedUnit::depth(Timestamp::ZERO, 0, payload))
            .await
            .unwrap();

        let (frame_number, depth) = rx.recv().await.unwrap();
        assert_eq!(frame_number, 0);
        assert!((depth - 2.75).abs() <= DepthRange::default().quantization_step());

        sender.close().await.unwrap();
        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
