use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{net::TcpStream, select, sync::mpsc::UnboundedSender, time};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::{Bytes, Message, client::IntoClientRequest},
};
use tracing::{debug, error};

use crate::{
    bybit::msg::{Op, PrivateStreamMsg},
    util::sign_hmac_sha256,
    venue::{ExecutionEvent, StreamEvent, VenueError},
};

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Pumps the authenticated private stream into the engine's event channel.
/// Reconnection is driven by the caller; each successful subscribe emits
/// [`StreamEvent::Resubscribed`] so the engine can re-reconcile.
pub struct PrivateStream {
    api_key: String,
    secret: String,
    ev_tx: UnboundedSender<StreamEvent>,
}

impl PrivateStream {
    pub fn new(api_key: String, secret: String, ev_tx: UnboundedSender<StreamEvent>) -> Self {
        Self {
            api_key,
            secret,
            ev_tx,
        }
    }

    async fn handle_stream_msg(
        &self,
        text: &str,
        write: &mut SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    ) -> Result<(), VenueError> {
        let msg = serde_json::from_str::<PrivateStreamMsg>(text)?;
        match msg {
            PrivateStreamMsg::Op(resp) => {
                debug!(?resp, "OpResponse");
                if resp.op == "auth" {
                    if resp.success.unwrap_or(false) {
                        let op = Op {
                            req_id: "subscribe".to_string(),
                            op: "subscribe".to_string(),
                            args: vec!["execution".to_string(), "order".to_string()],
                        };
                        let s = serde_json::to_string(&op).unwrap();
                        write.send(Message::Text(s.into())).await?;
                    } else {
                        return Err(VenueError::Auth(
                            resp.ret_msg.unwrap_or_else(|| "auth rejected".to_string()),
                        ));
                    }
                } else if resp.op == "subscribe" && resp.success.unwrap_or(false) {
                    let _ = self.ev_tx.send(StreamEvent::Resubscribed);
                }
            }
            PrivateStreamMsg::Topic(topic) => {
                if topic.topic.starts_with("execution") {
                    let executions: Vec<ExecutionEvent> = serde_json::from_value(topic.data)?;
                    for execution in executions {
                        debug!(?execution, "Execution");
                        if self
                            .ev_tx
                            .send(StreamEvent::Execution(execution))
                            .is_err()
                        {
                            return Err(VenueError::ConnectionInterrupted);
                        }
                    }
                } else if topic.topic.starts_with("order") {
                    // Order-status pushes are informational; fills arrive on
                    // the execution topic and the poll path covers the rest.
                    debug!(topic = %topic.topic, "order update");
                }
            }
        }
        Ok(())
    }

    pub async fn connect(&self, url: &str) -> Result<(), VenueError> {
        let request = url.into_client_request()?;
        let (ws_stream, _) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();
        let mut interval = time::interval(PING_INTERVAL);

        let expires = Utc::now().timestamp_millis() + 5000;
        let signature = sign_hmac_sha256(&self.secret, &format!("GET/realtime{expires}"));

        let op = Op {
            req_id: "auth".to_string(),
            op: "auth".to_string(),
            args: vec![self.api_key.clone(), expires.to_string(), signature],
        };
        let s = serde_json::to_string(&op).unwrap();
        write.send(Message::Text(s.into())).await?;

        loop {
            select! {
                _ = interval.tick() => {
                    let op = Op {
                        req_id: "ping".to_string(),
                        op: "ping".to_string(),
                        args: vec![],
                    };
                    let s = serde_json::to_string(&op).unwrap();
                    write.send(Message::Text(s.into())).await?;
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(error) = self.handle_stream_msg(&text, &mut write).await {
                                if matches!(error, VenueError::Auth(_)) {
                                    return Err(error);
                                }
                                error!(%text, ?error, "Couldn't handle private stream message");
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            write.send(Message::Pong(Bytes::default())).await?;
                        }
                        Some(Ok(Message::Close(close_frame))) => {
                            return Err(VenueError::ConnectionAbort(
                                close_frame.map(|f| f.to_string()).unwrap_or(String::new()),
                            ));
                        }
                        Some(Ok(Message::Binary(_)))
                        | Some(Ok(Message::Frame(_)))
                        | Some(Ok(Message::Pong(_))) => {}
                        Some(Err(error)) => {
                            return Err(VenueError::from(error));
                        }
                        None => {
                            return Err(VenueError::ConnectionInterrupted);
                        }
                    }
                }
            }
        }
    }
}
