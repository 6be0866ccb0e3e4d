use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::push::PushManager;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub user_id: Uuid,
}

/// Wraps the client's mailbox so the registry entry is dropped as soon as
/// the connection ends, whether the client read to completion or just
/// vanished mid-stream. Mirrors the original manager's `defer Unregister`.
struct ClientStream {
    inner: ReceiverStream<Value>,
    manager: web::Data<PushManager>,
    client_id: Uuid,
    sent_connected: bool,
    connected_frame: Option<Bytes>,
}

impl Stream for ClientStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.sent_connected {
            self.sent_connected = true;
            if let Some(frame) = self.connected_frame.take() {
                return Poll::Ready(Some(Ok(frame)));
            }
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                let event = frame
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("order-update")
                    .to_string();
                let payload = frame.get("payload").cloned().unwrap_or(frame);
                Poll::Ready(Some(Ok(sse_frame(&event, &payload))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let client_id = self.client_id;
        tokio::spawn(async move {
            manager.unregister(client_id).await;
        });
    }
}

/// `GET /orders-api/orders/stream?user_id=<uuid>`. Sends a `connected` frame
/// immediately, then an `order-update` frame per push targeted at `user_id`.
pub async fn stream(push_manager: web::Data<PushManager>, query: web::Query<StreamQuery>) -> HttpResponse {
    let user_id = query.user_id;
    info!(%user_id, "SSE client connecting");

    let (client_id, rx) = push_manager.register(user_id).await;

    let connected_frame = sse_frame(
        "connected",
        &json!({ "message": "Connected to order status updates", "user_id": user_id }),
    );

    let body = ClientStream {
        inner: ReceiverStream::new(rx),
        manager: push_manager,
        client_id,
        sent_connected: false,
        connected_frame: Some(connected_frame),
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(body)
}

fn sse_frame(event: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}
