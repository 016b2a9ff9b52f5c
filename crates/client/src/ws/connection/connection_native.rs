//! Native WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use pickup_live_shared::{RealtimeError, CLOSE_ABNORMAL};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::{Connector, OutboundFrame, Transport, TransportEvent};

/// Close code reported when the peer sent a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens `ws://` and `wss://` sockets with tokio-tungstenite.
///
/// Each open socket is served by a read task and a write task; the
/// [`Connection`](super::Connection) only ever sees the channel pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Transport, RealtimeError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::connection(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = unbounded::<OutboundFrame>();
        let (inbound_tx, inbound) = unbounded::<TransportEvent>();

        // Spawn write task
        let errors = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.next().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            crate::log_error!("Send failed: {}", e);
                            let _ = errors.unbounded_send(TransportEvent::Error(e.to_string()));
                            return;
                        }
                    }
                    OutboundFrame::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            crate::log_debug!("Close frame not delivered: {}", e);
                        }
                        return;
                    }
                }
            }
            // Sender dropped
            let _ = write.close().await;
        });

        // Spawn read task
        tokio::spawn(read_loop(read, inbound_tx));

        Ok(Transport { outbound, inbound })
    }
}

async fn read_loop<S>(mut read: S, events: UnboundedSender<TransportEvent>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if events
                    .unbounded_send(TransportEvent::Text(text.as_str().to_owned()))
                    .is_err()
                {
                    // Connection no longer listening
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                    None => (CLOSE_NO_STATUS, String::new()),
                };
                let _ = events.unbounded_send(TransportEvent::Closed { code, reason });
                return;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by tungstenite
            }
            Ok(_) => {
                // Ignore binary, pong, etc.
            }
            Err(e) => {
                let _ = events.unbounded_send(TransportEvent::Error(e.to_string()));
                let _ = events.unbounded_send(TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
    let _ = events.unbounded_send(TransportEvent::Closed {
        code: CLOSE_ABNORMAL,
        reason: "stream ended".to_string(),
    });
}
