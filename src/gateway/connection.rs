use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::MessageHandler;
use super::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::auth::InternalUser;
use crate::observability::Metrics;

/// What a connection task needs from its gateway
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub registry: Arc<dyn ConnectionRegistry>,
    pub handler: Arc<dyn MessageHandler>,
    pub metrics: Arc<Metrics>,
    pub shutdown: CancellationToken,
}

pub(crate) fn welcome_message(user: &InternalUser) -> String {
    json!({
        "type": "welcome",
        "message": "Connected to server",
        "userId": user.id,
    })
    .to_string()
}

/// Drive one authenticated socket until either side closes it
pub(crate) async fn serve(socket: WebSocket, user: InternalUser, ctx: ConnectionContext) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = ConnectionHandle::new(user.id.clone(), tx);
    let connection_id = handle.id;

    // Single writer: everything bound for this socket goes through the queue
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    ctx.registry.register(handle.clone());
    ctx.metrics.connection_opened();
    info!(%connection_id, user_id = %user.id, "WebSocket client connected");
    handle.send_text(welcome_message(&user));

    loop {
        let frame = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ctx.handler.handle(&user, text.as_str()).await {
                Ok(Some(reply)) => {
                    handle.send_text(reply);
                }
                Ok(None) => {}
                Err(e) => error!(%connection_id, user_id = %user.id, error = %e, "WebSocket message handler error"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Binary(_))) => {
                debug!(%connection_id, "Binary frame ignored");
            }
            // Pong is handled automatically by axum
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(%connection_id, user_id = %user.id, error = %e, "WebSocket connection error");
                break;
            }
        }
    }

    ctx.registry.unregister(&user.id, connection_id);
    handle.close();
    drop(handle);
    if let Err(e) = writer.await {
        debug!(%connection_id, error = %e, "Writer task ended abnormally");
    }
    ctx.metrics.connection_closed();
    info!(%connection_id, user_id = %user.id, "WebSocket client disconnected");
}
