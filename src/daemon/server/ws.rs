use crate::daemon::coordinator::Coordinator;
use crate::daemon::pipeline::{Feedback, IngestCommand};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use fornax_core::sample::WireSample;

/// Messages a device connection may send. `identify` binds a device
/// identity to the connection; the identity is what gets disconnected when
/// the transport closes.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Identify {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    OvenActive {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    Stop {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    Sample(WireSample),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerFrame {
    Error { message: String },
}

pub async fn ingest_handler(
    ws: WebSocketUpgrade,
    State(coordinator): State<Arc<Coordinator>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, coordinator))
}

async fn handle_socket(mut socket: WebSocket, coordinator: Arc<Coordinator>) {
    info!("device connection opened");
    // Validation failures flow back through this channel so the producer
    // hears about its own bad frames without slowing the shard workers.
    let (feedback_tx, mut feedback_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let mut identified: Option<String> = None;

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                handle_message(&coordinator, message, &mut identified, &feedback_tx)
                            }
                            Err(e) => {
                                warn!("unparseable device frame: {e}");
                                let frame = ServerFrame::Error {
                                    message: format!("invalid message: {e}"),
                                };
                                if send_frame(&mut socket, &frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("device socket error: {e}");
                        break;
                    }
                }
            }
            Some(message) = feedback_rx.recv() => {
                let frame = ServerFrame::Error { message };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(device) = identified {
        info!("device connection for '{}' closed", device);
        coordinator.dispatch(IngestCommand::Disconnect { device });
    } else {
        info!("anonymous device connection closed");
    }
}

fn handle_message(
    coordinator: &Coordinator,
    message: ClientMessage,
    identified: &mut Option<String>,
    feedback_tx: &Feedback,
) {
    match message {
        ClientMessage::Identify { client_id } => {
            *identified = Some(client_id.clone());
            coordinator.dispatch(IngestCommand::Identify { device: client_id });
        }
        ClientMessage::OvenActive { device_id } => {
            if identified.is_none() {
                *identified = Some(device_id.clone());
            }
            coordinator.dispatch(IngestCommand::Activate { device: device_id });
        }
        ClientMessage::Stop { device_id } => {
            coordinator.dispatch(IngestCommand::Stop { device: device_id });
        }
        ClientMessage::Sample(wire) => {
            coordinator.dispatch(IngestCommand::Sample {
                wire,
                feedback: Some(feedback_tx.clone()),
            });
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_else(|_| "{}".into());
    socket.send(Message::Text(json.into())).await
}
