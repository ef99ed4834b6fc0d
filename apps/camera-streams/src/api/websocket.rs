use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::{Message, Session};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::api::AppState;
use crate::status::{StatusEvent, StatusSubscription};

/// Sent by a client to narrow its feed. An empty or missing list means every camera.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub camera_ids: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct ClientFilter {
    camera_ids: HashSet<String>,
}

impl ClientFilter {
    fn should_receive(&self, event: &StatusEvent) -> bool {
        self.camera_ids.is_empty() || self.camera_ids.contains(&event.camera_id)
    }

    fn update(&mut self, request: SubscriptionRequest) -> Vec<String> {
        self.camera_ids = request.camera_ids.unwrap_or_default().into_iter().collect();
        let mut ids: Vec<_> = self.camera_ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Upgrades to a WebSocket that relays status events as JSON text frames.
pub async fn websocket_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, mut session, stream) = actix_ws::handle(&req, body)?;

    let subscription = state.manager.publisher().subscribe();
    let client_id = subscription.id();
    info!(client_id, "New WebSocket connection");

    let filter = Arc::new(RwLock::new(ClientFilter::default()));
    let (closed_tx, closed_rx) = oneshot::channel();

    // Events published meanwhile wait in the subscription
    let welcome = json!({
        "type": "connected",
        "clientId": client_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    let _ = session.text(welcome.to_string()).await;

    actix_rt::spawn(handle_client_messages(
        client_id,
        stream,
        session.clone(),
        filter.clone(),
        closed_tx,
    ));
    actix_rt::spawn(forward_events(
        client_id,
        subscription,
        session,
        filter,
        closed_rx,
    ));

    Ok(response)
}

async fn forward_events(
    client_id: u64,
    mut subscription: StatusSubscription,
    mut session: Session,
    filter: Arc<RwLock<ClientFilter>>,
    mut closed: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = &mut closed => break,
        };

        if !filter.read().should_receive(&event) {
            continue;
        }
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize status event: {}", e);
                continue;
            }
        };
        if session.text(text).await.is_err() {
            debug!(client_id, "WebSocket closed while sending");
            break;
        }
    }
    debug!(client_id, "Status feed ended");
}

async fn handle_client_messages(
    client_id: u64,
    mut stream: actix_ws::MessageStream,
    mut session: Session,
    filter: Arc<RwLock<ClientFilter>>,
    closed: oneshot::Sender<()>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!(client_id, "Received text message: {}", text);
                match serde_json::from_str::<SubscriptionRequest>(&text) {
                    Ok(request) => {
                        let camera_ids = filter.write().update(request);
                        debug!(client_id, ?camera_ids, "Subscription updated");
                        let confirmation = json!({
                            "type": "subscribed",
                            "cameraIds": camera_ids,
                        });
                        if session.text(confirmation.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(client_id, "Ignoring unrecognized message: {}", e),
                }
            }
            Ok(Message::Ping(bytes)) => {
                if session.pong(&bytes).await.is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {
                debug!(client_id, "Received pong");
            }
            Ok(Message::Close(reason)) => {
                info!(client_id, "Client closing connection: {:?}", reason);
                let _ = session.close(reason).await;
                break;
            }
            Err(e) => {
                error!(client_id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    let _ = closed.send(());
    info!(client_id, "WebSocket client disconnected");
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket_handler));
}
