use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::Message;
use crate::services::{ChatCoordinator, TypingDebouncer};
use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound client frames
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsInbound {
    /// A keystroke; debounced before it reaches presence
    Typing,
    StopTyping,
    Read,
    Send { text: String },
}

/// Items merged into the session from its live sources
enum WsPush {
    Messages(Vec<Message>),
    Typing(Vec<Uuid>),
    /// Debounced local typing transition to publish
    LocalTyping(bool),
}

// Message type for sending text to WebSocket
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

struct WsSession {
    chat_id: Uuid,
    user_id: Uuid,
    chats: Arc<ChatCoordinator>,
    debouncer: TypingDebouncer,
    pushes: Option<BoxStream<'static, WsPush>>,
    hb: Instant,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(chat_id = %act.chat_id, user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn publish_typing(&self, is_typing: bool) {
        let chats = self.chats.clone();
        let (chat_id, user_id) = (self.chat_id, self.user_id);
        actix::spawn(async move {
            if let Err(e) = chats.set_typing(chat_id, user_id, is_typing).await {
                tracing::warn!(chat_id = %chat_id, user_id = %user_id, error = %e, "typing update rejected");
            }
        });
    }

    fn handle_inbound(&mut self, event: WsInbound, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            WsInbound::Typing => self.debouncer.keystroke(),
            WsInbound::StopTyping => self.debouncer.stop(),
            WsInbound::Read => {
                let chats = self.chats.clone();
                let (chat_id, user_id) = (self.chat_id, self.user_id);
                let addr = ctx.address();
                actix::spawn(async move {
                    if let Err(e) = chats.mark_read(chat_id, user_id).await {
                        addr.do_send(TextMessage(error_frame(&e)));
                    }
                });
            }
            WsInbound::Send { text } => {
                self.debouncer.stop();
                let chats = self.chats.clone();
                let (chat_id, user_id) = (self.chat_id, self.user_id);
                let addr = ctx.address();
                actix::spawn(async move {
                    if let Err(e) = chats.send_message(chat_id, user_id, &text).await {
                        addr.do_send(TextMessage(error_frame(&e)));
                    }
                });
            }
        }
    }
}

fn error_frame(e: &AppError) -> String {
    json!({
        "type": "error",
        "code": e.code(),
        "message": e.to_string(),
        "retryable": e.is_retryable(),
    })
    .to_string()
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(chat_id = %self.chat_id, user_id = %self.user_id, "WebSocket session started");
        self.hb(ctx);
        if let Some(pushes) = self.pushes.take() {
            ctx.add_stream(pushes);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(chat_id = %self.chat_id, user_id = %self.user_id, "WebSocket session stopped");
        let was_typing = self.debouncer.is_typing();
        self.debouncer.cancel();
        if was_typing {
            self.publish_typing(false);
        }
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<WsPush> for WsSession {
    fn handle(&mut self, item: WsPush, ctx: &mut Self::Context) {
        match item {
            WsPush::Messages(messages) => ctx.text(
                json!({ "type": "messages", "chatId": self.chat_id, "messages": messages }).to_string(),
            ),
            WsPush::Typing(user_ids) => ctx.text(
                json!({ "type": "typing", "chatId": self.chat_id, "userIds": user_ids }).to_string(),
            ),
            WsPush::LocalTyping(is_typing) => self.publish_typing(is_typing),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(chat_id = %self.chat_id, "live feeds ended, closing session");
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsInbound>(&text) {
                Ok(event) => self.handle_inbound(event, ctx),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse WS message");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Live chat feed: ordered message snapshots and typing sets
///
/// **Endpoint**: `GET /chats/{id}/ws`
#[get("/chats/{id}/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let chat_id = chat_id.into_inner();

    // Authorization happens here so a denied caller never upgrades
    let messages = state.chats.subscribe_to_messages(chat_id, user.id).await?;
    let typing = state.chats.subscribe_typing(chat_id, user.id).await?;

    let (debouncer, transitions) = TypingDebouncer::new(state.config.typing_debounce);
    let local_typing = stream::unfold(transitions, |mut rx| async move {
        let next = rx.recv().await?;
        Some((WsPush::LocalTyping(next), rx))
    });

    let pushes = stream::select(
        stream::select(
            messages.into_stream().map(WsPush::Messages),
            typing.into_stream().map(WsPush::Typing),
        ),
        local_typing,
    )
    .boxed();

    let session = WsSession {
        chat_id,
        user_id: user.id,
        chats: state.chats.clone(),
        debouncer,
        pushes: Some(pushes),
        hb: Instant::now(),
    };

    ws::start(session, &req, stream)
}
