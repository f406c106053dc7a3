//! WebSocket chat router.
//!
//! Each socket gets a [`Session`] that walks the connection state machine:
//! it starts unauthenticated, binds to a user on `auth`, relays `message`
//! frames while authenticated, and cleans up the registry on close. Frames
//! going out to a socket pass through a bounded queue drained by a single
//! writer task, so per-socket order is preserved.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRef, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use community_shared::constants::OUTBOUND_QUEUE_SIZE;
use community_shared::protocol::{ClientFrame, ServerFrame};
use community_shared::{ChatId, UserId};
use community_store::MessageWithSender;

use crate::api::{AppState, SharedDatabase};
use crate::error::ServerError;
use crate::rate_limit::RateLimiter;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// A frame queued for a socket's writer task.
pub type OutboundFrame = ServerFrame<MessageWithSender>;

/// Everything a session needs from the application.
#[derive(Clone)]
pub struct RealtimeContext {
    pub db: SharedDatabase,
    pub registry: ConnectionRegistry,
    pub limiter: RateLimiter<UserId>,
    pub max_message_length: usize,
}

impl FromRef<AppState> for RealtimeContext {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            registry: state.registry.clone(),
            limiter: state.message_limiter.clone(),
            max_message_length: state.config.max_message_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    Authenticated(UserId),
    Closed,
}

/// Protocol state of one WebSocket connection.
pub struct Session {
    id: ConnectionId,
    ctx: RealtimeContext,
    outbound: mpsc::Sender<OutboundFrame>,
    state: SessionState,
}

impl Session {
    pub fn new(ctx: RealtimeContext, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            outbound,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.state {
            SessionState::Authenticated(user_id) => Some(user_id),
            _ => None,
        }
    }

    /// Handle one text frame. Failures are answered with an `error` frame
    /// and never end the session.
    pub async fn handle_text(&mut self, text: &str) {
        if let Err(e) = self.dispatch(text).await {
            debug!(connection = %self.id, error = %e, "Frame rejected");
            self.reply(ServerFrame::error(e.public_message()));
        }
    }

    pub fn reject_binary(&self) {
        self.reply(ServerFrame::error(
            ServerError::from(community_shared::FrameError::Binary).public_message(),
        ));
    }

    async fn dispatch(&mut self, text: &str) -> Result<(), ServerError> {
        let frame = ClientFrame::parse(text, self.ctx.max_message_length)?;

        match (self.state, frame) {
            (SessionState::Closed, _) => Err(ServerError::BadRequest("Connection closed".into())),
            (SessionState::Unauthenticated, ClientFrame::Auth { user_id }) => {
                self.authenticate(user_id).await
            }
            (SessionState::Unauthenticated, ClientFrame::Message { .. }) => {
                Err(ServerError::Unauthorized("Authenticate first".into()))
            }
            (SessionState::Authenticated(_), ClientFrame::Auth { .. }) => {
                Err(ServerError::BadRequest("Already authenticated".into()))
            }
            (SessionState::Authenticated(sender), ClientFrame::Message { chat_id, content }) => {
                self.send_message(sender, chat_id, &content).await
            }
        }
    }

    /// Presence changes take the store lock first and hold it across the
    /// registry update, so the registry and `is_online` always move together.
    async fn authenticate(&mut self, user_id: UserId) -> Result<(), ServerError> {
        let db = self.ctx.db.lock().await;
        db.set_user_online(user_id, true)?;

        let handle = ConnectionHandle::new(self.id, user_id, self.outbound.clone());
        self.ctx.registry.register(handle).await;
        drop(db);

        self.state = SessionState::Authenticated(user_id);

        info!(connection = %self.id, user = %user_id, "Session authenticated");
        Ok(())
    }

    async fn send_message(
        &self,
        sender: UserId,
        chat_id: ChatId,
        content: &str,
    ) -> Result<(), ServerError> {
        if !self.ctx.limiter.check(sender).await {
            warn!(user = %sender, "Message rate limit exceeded");
            return Err(ServerError::RateLimited);
        }

        let (chat, message) = {
            let db = self.ctx.db.lock().await;
            let chat = db.get_chat(chat_id)?;
            if !chat.has_participant(sender) {
                return Err(ServerError::Forbidden(format!(
                    "Not a participant of chat {chat_id}"
                )));
            }
            let stored = db.insert_message(chat_id, sender, content)?;
            (chat, db.get_message_with_sender(stored.id)?)
        };

        let delivered = match chat.other_participant(sender) {
            Some(recipient) => match self.ctx.registry.get(recipient).await {
                Some(conn) => conn.send(ServerFrame::NewMessage {
                    message: message.clone(),
                }),
                None => false,
            },
            None => false,
        };

        debug!(
            chat = %chat_id,
            sender = %sender,
            message = %message.message.id,
            delivered,
            "Message routed"
        );

        self.reply(ServerFrame::MessageSent { message });
        Ok(())
    }

    fn reply(&self, frame: OutboundFrame) {
        if let Err(e) = self.outbound.try_send(frame) {
            debug!(connection = %self.id, error = %e, "Dropping reply");
        }
    }

    /// Leave the registry and mark the user offline, unless a newer
    /// connection for the same user has taken over.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        let SessionState::Authenticated(user_id) = state else {
            return;
        };

        let db = self.ctx.db.lock().await;
        if !self.ctx.registry.unregister_if_current(user_id, self.id).await {
            return;
        }

        if let Err(e) = db.set_user_online(user_id, false) {
            warn!(user = %user_id, error = %e, "Failed to record user offline");
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<RealtimeContext>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: RealtimeContext) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_SIZE);

    let mut session = Session::new(ctx, tx);
    let connection = session.id();
    info!(connection = %connection, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection = %connection, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Binary(_)) => session.reject_binary(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    let user = session.user_id();
    session.close().await;
    writer.abort();
    info!(connection = %connection, user = ?user, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use community_shared::Gender;
    use community_store::{Database, NewUser};

    use super::*;

    struct Harness {
        ctx: RealtimeContext,
        alice: UserId,
        bob: UserId,
        carol: UserId,
        chat: ChatId,
    }

    async fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let user = db
                .create_user(&NewUser {
                    username: name.into(),
                    gender: Gender::Unset,
                    telegram_id: None,
                })
                .unwrap();
            ids.push(user.id);
        }
        let chat = db.get_or_create_chat(ids[0], ids[1]).unwrap().id;

        Harness {
            ctx: RealtimeContext {
                db: Arc::new(Mutex::new(db)),
                registry: ConnectionRegistry::new(),
                limiter: RateLimiter::new(100.0, 100.0),
                max_message_length: 20,
            },
            alice: ids[0],
            bob: ids[1],
            carol: ids[2],
            chat,
        }
    }

    fn connect(ctx: &RealtimeContext) -> (Session, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(ctx.clone(), tx), rx)
    }

    async fn login(session: &mut Session, user: UserId) {
        session
            .handle_text(&format!(r#"{{"type":"auth","userId":{user}}}"#))
            .await;
        assert_eq!(session.user_id(), Some(user));
    }

    fn message_frame(chat: ChatId, content: &str) -> String {
        serde_json::json!({ "type": "message", "chatId": chat.0, "content": content }).to_string()
    }

    fn expect_error(rx: &mut mpsc::Receiver<OutboundFrame>) -> String {
        match rx.try_recv().unwrap() {
            ServerFrame::Error { message } => message,
            other => panic!("expected error frame, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn message_reaches_online_peer_once() {
        let h = harness().await;
        let (mut alice, mut alice_rx) = connect(&h.ctx);
        let (mut bob, mut bob_rx) = connect(&h.ctx);
        login(&mut alice, h.alice).await;
        login(&mut bob, h.bob).await;

        alice.handle_text(&message_frame(h.chat, "hi bob")).await;

        let sent = alice_rx.try_recv().unwrap();
        assert_eq!(sent.kind(), "message_sent");
        assert!(alice_rx.try_recv().is_err());

        let received = bob_rx.try_recv().unwrap();
        assert_eq!(received.kind(), "new_message");
        assert!(bob_rx.try_recv().is_err());

        let payload = received.payload().unwrap();
        assert_eq!(payload.message.content, "hi bob");
        assert_eq!(payload.sender.id, h.alice);
        assert!(!payload.message.read);
        assert_eq!(sent.payload(), Some(payload));
    }

    #[tokio::test]
    async fn offline_peer_reads_message_from_history() {
        let h = harness().await;
        let (mut alice, mut alice_rx) = connect(&h.ctx);
        login(&mut alice, h.alice).await;

        alice.handle_text(&message_frame(h.chat, "later")).await;
        assert_eq!(alice_rx.try_recv().unwrap().kind(), "message_sent");

        let db = h.ctx.db.lock().await;
        assert_eq!(db.unread_count(h.chat, h.bob).unwrap(), 1);
        let history = db.fetch_chat_history(h.chat, h.bob).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.content, "later");
        assert!(history[0].message.read);
        assert_eq!(db.unread_count(h.chat, h.bob).unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_frames_keep_connection_usable() {
        let h = harness().await;
        let (mut alice, mut rx) = connect(&h.ctx);

        alice.handle_text("not json").await;
        expect_error(&mut rx);

        alice.handle_text(&message_frame(h.chat, "too early")).await;
        expect_error(&mut rx);
        assert_eq!(alice.user_id(), None);

        alice.handle_text(r#"{"type":"auth","userId":999}"#).await;
        expect_error(&mut rx);
        assert_eq!(alice.user_id(), None);

        login(&mut alice, h.alice).await;

        alice.handle_text(r#"{"type":"wave"}"#).await;
        expect_error(&mut rx);
        alice.handle_text(&message_frame(h.chat, "   ")).await;
        expect_error(&mut rx);
        alice.handle_text(&message_frame(h.chat, &"x".repeat(21))).await;
        expect_error(&mut rx);
        alice
            .handle_text(r#"{"type":"message","chatId":"one","content":"hi"}"#)
            .await;
        expect_error(&mut rx);
        alice.reject_binary();
        expect_error(&mut rx);
        alice
            .handle_text(&format!(r#"{{"type":"auth","userId":{}}}"#, h.bob))
            .await;
        expect_error(&mut rx);
        assert_eq!(alice.user_id(), Some(h.alice));

        alice.handle_text(&message_frame(h.chat, "still here")).await;
        assert_eq!(rx.try_recv().unwrap().kind(), "message_sent");
    }

    #[tokio::test]
    async fn outsider_and_unknown_chat_are_rejected() {
        let h = harness().await;
        let (mut carol, mut rx) = connect(&h.ctx);
        login(&mut carol, h.carol).await;

        carol.handle_text(&message_frame(h.chat, "let me in")).await;
        assert!(expect_error(&mut rx).starts_with("Forbidden"));

        carol.handle_text(&message_frame(ChatId(404), "anyone?")).await;
        assert!(expect_error(&mut rx).starts_with("Not found"));

        let db = h.ctx.db.lock().await;
        assert!(db.fetch_chat_history(h.chat, h.alice).unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_rate_limit_answers_with_error() {
        let mut h = harness().await;
        h.ctx.limiter = RateLimiter::new(0.0, 1.0);
        let (mut alice, mut rx) = connect(&h.ctx);
        login(&mut alice, h.alice).await;

        alice.handle_text(&message_frame(h.chat, "one")).await;
        assert_eq!(rx.try_recv().unwrap().kind(), "message_sent");

        alice.handle_text(&message_frame(h.chat, "two")).await;
        assert_eq!(expect_error(&mut rx), "Rate limit exceeded");
    }

    #[tokio::test]
    async fn reconnect_replaces_route_and_stale_close_keeps_presence() {
        let h = harness().await;
        let (mut first, mut first_rx) = connect(&h.ctx);
        let (mut second, mut second_rx) = connect(&h.ctx);
        let (mut alice, _alice_rx) = connect(&h.ctx);
        login(&mut first, h.bob).await;
        login(&mut second, h.bob).await;
        login(&mut alice, h.alice).await;

        alice.handle_text(&message_frame(h.chat, "which one?")).await;
        assert_eq!(second_rx.try_recv().unwrap().kind(), "new_message");
        assert!(first_rx.try_recv().is_err());

        first.close().await;
        assert!(h.ctx.registry.is_connected(h.bob).await);
        assert!(h.ctx.db.lock().await.get_user(h.bob).unwrap().is_online);

        second.close().await;
        assert!(!h.ctx.registry.is_connected(h.bob).await);
        let bob = h.ctx.db.lock().await.get_user(h.bob).unwrap();
        assert!(!bob.is_online);
        assert!(bob.last_seen.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconnect_racing_stale_close_keeps_presence_in_sync() {
        let h = harness().await;
        let auth = format!(r#"{{"type":"auth","userId":{}}}"#, h.bob);

        for round in 0..500 {
            let (mut first, _first_rx) = connect(&h.ctx);
            let (mut second, _second_rx) = connect(&h.ctx);
            login(&mut first, h.bob).await;

            let closing = tokio::spawn(async move { first.close().await });
            let frame = auth.clone();
            let joining = tokio::spawn(async move {
                second.handle_text(&frame).await;
                second
            });
            closing.await.unwrap();
            let mut second = joining.await.unwrap();

            let connected = h.ctx.registry.is_connected(h.bob).await;
            let online = h.ctx.db.lock().await.get_user(h.bob).unwrap().is_online;
            assert!(connected, "round {round}: newer connection evicted");
            assert!(online, "round {round}: registered but stored offline");

            second.close().await;
            assert!(!h.ctx.db.lock().await.get_user(h.bob).unwrap().is_online);
        }
    }

    #[tokio::test]
    async fn closing_unauthenticated_session_is_a_no_op() {
        let h = harness().await;
        let (mut session, _rx) = connect(&h.ctx);
        session.close().await;
        assert_eq!(h.ctx.registry.connection_count().await, 0);
    }
}
