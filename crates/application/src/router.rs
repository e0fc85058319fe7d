//! 入站事件路由
//!
//! 校验入站事件，修改房间/在线状态，并产出需要投递的出站事件。
//! 路由器本身不写连接，写入由 [`Dispatcher`](crate::dispatcher::Dispatcher) 完成。

use std::sync::Arc;

use domain::{
    ClientEvent, ConnectionId, HistoryEntry, Message, MessageBody, MessageId, RoomId, ServerEvent,
    UserId,
};
use tracing::{debug, info, warn};

use crate::connection_registry::Transport;
use crate::dispatcher::Outbox;
use crate::error::RealtimeError;
use crate::realtime_core::Core;
use crate::repository::StoreError;
use crate::room_directory::PresenceChange;

#[derive(Clone)]
pub struct EventRouter {
    core: Arc<Core>,
}

impl EventRouter {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// 认证凭证并注册连接。认证失败时连接不会被注册，由调用方关闭传输。
    pub async fn connect(
        &self,
        transport: Transport,
        credential: &str,
    ) -> Result<ConnectionId, RealtimeError> {
        let user_id = self
            .core
            .user_directory()
            .authenticate(credential.to_owned())
            .await
            .map_err(|err| {
                warn!(error = %err, "连接认证失败");
                RealtimeError::from(err)
            })?;
        self.core.registry().open(transport, user_id)
    }

    /// 路由一个入站事件；失败时只给发起连接回一个 `error` 事件
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) -> Outbox {
        let kind = event.kind();
        match self.route(connection_id, event).await {
            Ok(outbox) => outbox,
            Err(err) => {
                debug!(connection_id = %connection_id, event = kind, code = err.code(), "事件处理失败");
                Self::reject(connection_id, &err)
            }
        }
    }

    pub fn reject(connection_id: ConnectionId, err: &RealtimeError) -> Outbox {
        Outbox::reply(connection_id, ServerEvent::error(err.code(), err.to_string()))
    }

    pub async fn route(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<Outbox, RealtimeError> {
        let user_id = self
            .core
            .registry()
            .user_of(connection_id)
            .ok_or(RealtimeError::NotAuthenticated(connection_id))?;
        debug!(connection_id = %connection_id, user_id = %user_id, event = event.kind(), "路由入站事件");

        match event {
            ClientEvent::Join { room_id } => self.join(connection_id, room_id),
            ClientEvent::Leave { room_id } => self.leave(connection_id, room_id),
            ClientEvent::Message { room_id, body } => {
                self.send_message(connection_id, user_id, room_id, body).await
            }
            ClientEvent::Typing { room_id } => self.typing(connection_id, user_id, room_id),
            ClientEvent::Edit {
                room_id,
                message_id,
                body,
            } => {
                self.edit_message(connection_id, user_id, room_id, message_id, body)
                    .await
            }
            ClientEvent::Delete {
                room_id,
                message_id,
            } => {
                self.delete_message(connection_id, user_id, room_id, message_id)
                    .await
            }
            ClientEvent::MarkRead {
                room_id,
                message_id,
            } => self.mark_read(connection_id, user_id, room_id, message_id),
            ClientEvent::History {
                room_id,
                limit,
                before,
            } => self.history(connection_id, room_id, limit, before).await,
        }
    }

    /// 关闭连接：先标记为关闭，再从所有房间移除，并通知剩余成员离线。幂等。
    pub fn disconnect(&self, connection_id: ConnectionId) -> Outbox {
        if let Some(closed) = self.core.registry().close(connection_id) {
            info!(connection_id = %connection_id, user_id = %closed.user_id, "连接断开");
        }

        let mut outbox = Outbox::new();
        for change in self.core.rooms().remove_connection(connection_id) {
            self.announce(&mut outbox, change, None);
        }
        outbox
    }

    fn join(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<Outbox, RealtimeError> {
        let outcome = self.core.rooms().join(room_id, connection_id)?;

        let mut outbox = Outbox::reply(connection_id, ServerEvent::RoomJoined { room_id });
        if let Some(change) = outcome.presence {
            self.announce(&mut outbox, change, Some(connection_id));
        }
        Ok(outbox)
    }

    fn leave(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<Outbox, RealtimeError> {
        let outcome = self.core.rooms().leave(room_id, connection_id);
        if !outcome.was_member {
            return Err(RealtimeError::NotAMember(room_id));
        }

        let mut outbox = Outbox::reply(connection_id, ServerEvent::RoomLeft { room_id });
        if let Some(change) = outcome.presence {
            self.announce(&mut outbox, change, None);
        }
        Ok(outbox)
    }

    async fn send_message(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
        body: String,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;
        let body = MessageBody::parse(body, self.core.settings().max_message_chars)?;
        let message = Message::new(
            MessageId::generate(),
            room_id,
            user_id,
            body,
            self.core.clock().now(),
        );

        // 持久化与扇出在同一个房间许可内完成，接收者看到的顺序与追加顺序一致
        let mut permit = self.core.sequencer().acquire(room_id).await;
        let id = self
            .core
            .message_store()
            .append(message.clone())
            .await
            .map_err(|err| persistence_failed(room_id, err))?;
        let message = message.persisted(id);
        let sequence = permit.next_sequence();

        self.core.presence().clear_typing(room_id, user_id);
        info!(room_id = %room_id, message_id = %id, sequence, "消息已持久化");

        let mut outbox = Outbox::new();
        outbox.push(
            self.core.rooms().members_of(room_id),
            ServerEvent::new_message(&message, sequence),
        );
        outbox.hold(permit);
        Ok(outbox)
    }

    fn typing(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;
        self.core.presence().mark_typing(room_id, user_id);

        // 不回显给同一用户的任何设备
        let own = self.core.registry().list_connections_for(user_id);
        let targets = self
            .core
            .rooms()
            .members_of(room_id)
            .into_iter()
            .filter(|id| !own.contains(id));

        let mut outbox = Outbox::new();
        outbox.push(targets, ServerEvent::TypingChanged { room_id, user_id });
        Ok(outbox)
    }

    async fn edit_message(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
        body: String,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;
        let body = MessageBody::parse(body, self.core.settings().max_message_chars)?;

        let mut permit = self.core.sequencer().acquire(room_id).await;
        self.owned_message(user_id, room_id, message_id).await?;

        let edited_at = self.core.clock().now();
        let updated = self
            .core
            .message_store()
            .edit(message_id, body, edited_at)
            .await
            .map_err(|err| persistence_failed(room_id, err))?;
        let sequence = permit.next_sequence();
        info!(room_id = %room_id, message_id = %message_id, sequence, "消息已编辑");

        let mut outbox = Outbox::new();
        outbox.push(
            self.core.rooms().members_of(room_id),
            ServerEvent::message_edited(&updated, edited_at, sequence),
        );
        outbox.hold(permit);
        Ok(outbox)
    }

    async fn delete_message(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;

        let mut permit = self.core.sequencer().acquire(room_id).await;
        self.owned_message(user_id, room_id, message_id).await?;

        let deleted_at = self.core.clock().now();
        self.core
            .message_store()
            .delete(message_id, deleted_at)
            .await
            .map_err(|err| persistence_failed(room_id, err))?;
        let sequence = permit.next_sequence();
        info!(room_id = %room_id, message_id = %message_id, sequence, "消息已删除");

        let mut outbox = Outbox::new();
        outbox.push(
            self.core.rooms().members_of(room_id),
            ServerEvent::MessageDeleted {
                id: message_id,
                room_id,
                deleted_at,
                sequence,
            },
        );
        outbox.hold(permit);
        Ok(outbox)
    }

    fn mark_read(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;

        // 同一用户的其他设备也会收到，用于同步已读位置
        let targets = self
            .core
            .rooms()
            .members_of(room_id)
            .into_iter()
            .filter(|id| *id != connection_id);

        let mut outbox = Outbox::new();
        outbox.push(
            targets,
            ServerEvent::MessageRead {
                room_id,
                message_id,
                user_id,
            },
        );
        Ok(outbox)
    }

    async fn history(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<Outbox, RealtimeError> {
        self.ensure_member(room_id, connection_id)?;
        let messages = self.load_history(room_id, limit, before).await?;
        Ok(Outbox::reply(
            connection_id,
            ServerEvent::History { room_id, messages },
        ))
    }

    /// 历史消息（已删除的消息不返回）。HTTP 查询接口也走这里。
    pub async fn load_history(
        &self,
        room_id: RoomId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<Vec<HistoryEntry>, RealtimeError> {
        // 未校验的配置可能给出 0，至少取一条
        let max = self.core.settings().history_page_limit.max(1);
        let limit = limit.unwrap_or(max).clamp(1, max);

        let messages = self
            .core
            .message_store()
            .history(room_id, limit, before)
            .await
            .map_err(|err| persistence_failed(room_id, err))?;

        Ok(messages
            .iter()
            .filter(|message| !message.is_deleted)
            .map(HistoryEntry::from)
            .collect())
    }

    fn ensure_member(&self, room_id: RoomId, connection_id: ConnectionId) -> Result<(), RealtimeError> {
        if self.core.rooms().is_member(room_id, connection_id) {
            Ok(())
        } else {
            Err(RealtimeError::NotAMember(room_id))
        }
    }

    /// 查找房间内未删除、且由该用户发送的消息
    async fn owned_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<Message, RealtimeError> {
        let message = self
            .core
            .message_store()
            .find(message_id)
            .await
            .map_err(|err| persistence_failed(room_id, err))?
            .filter(|message| message.room_id == room_id && !message.is_deleted)
            .ok_or(RealtimeError::MessageNotFound(message_id))?;

        if !message.is_sent_by(user_id) {
            return Err(RealtimeError::NotMessageOwner(message_id));
        }
        Ok(message)
    }

    /// 把在线状态变化发给房间内的成员；离线时同时清除该用户的输入状态
    fn announce(&self, outbox: &mut Outbox, change: PresenceChange, except: Option<ConnectionId>) {
        if !change.online {
            self.core.presence().clear_typing(change.room_id, change.user_id);
            self.core.dispatcher().release_room_if_empty(change.room_id);
        }
        let targets = self
            .core
            .rooms()
            .members_of(change.room_id)
            .into_iter()
            .filter(|id| Some(*id) != except);
        outbox.push(
            targets,
            ServerEvent::PresenceChanged {
                room_id: change.room_id,
                user_id: change.user_id,
                online: change.online,
            },
        );
    }
}

fn persistence_failed(room_id: RoomId, err: StoreError) -> RealtimeError {
    match err {
        StoreError::NotFound(id) => RealtimeError::MessageNotFound(id),
        err => {
            warn!(room_id = %room_id, error = %err, "消息存储失败");
            RealtimeError::Persistence(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::realtime_core::CoreDependencies;
    use crate::repository::{DirectoryError, MockMessageStore, MockUserDirectory};
    use chrono::Utc;
    use config::RealtimeConfig;
    use tokio::sync::mpsc;

    struct Client {
        id: ConnectionId,
        user: UserId,
        _queue: mpsc::Receiver<ServerEvent>,
    }

    fn router_with(store: MockMessageStore) -> EventRouter {
        router_with_settings(
            store,
            RealtimeConfig {
                send_timeout_ms: 50,
                ..RealtimeConfig::default()
            },
        )
    }

    fn router_with_settings(store: MockMessageStore, settings: RealtimeConfig) -> EventRouter {
        let mut directory = MockUserDirectory::new();
        directory.expect_authenticate().returning(|credential| {
            credential
                .parse::<UserId>()
                .map_err(|_| DirectoryError::InvalidCredential(credential))
        });

        let core = Core::new(
            CoreDependencies {
                user_directory: Arc::new(directory),
                message_store: Arc::new(store),
                clock: Arc::new(ManualClock::default()),
            },
            settings,
        );
        core.router()
    }

    async fn connect(router: &EventRouter, user: UserId) -> Client {
        let (tx, rx) = mpsc::channel(16);
        let id = router.connect(tx, &user.to_string()).await.unwrap();
        Client {
            id,
            user,
            _queue: rx,
        }
    }

    async fn join(router: &EventRouter, client: &Client, room_id: RoomId) -> Outbox {
        router.route(client.id, ClientEvent::Join { room_id }).await.unwrap()
    }

    fn error_code(outbox: &Outbox, connection_id: ConnectionId) -> Option<String> {
        match outbox.events_for(connection_id).as_slice() {
            [ServerEvent::Error { code, .. }] => Some(code.clone()),
            _ => None,
        }
    }

    fn stored(room_id: RoomId, sender: UserId, body: &str) -> Message {
        Message::new(
            MessageId::generate(),
            room_id,
            sender,
            MessageBody::parse(body, 4000).unwrap(),
            Utc::now(),
        )
        .persisted(MessageId::generate())
    }

    #[tokio::test]
    async fn connect_rejects_bad_credentials() {
        let router = router_with(MockMessageStore::new());
        let (tx, _rx) = mpsc::channel(4);

        let err = router.connect(tx, "not-a-token").await.unwrap_err();

        assert_eq!(err.code(), "AuthenticationError");
        assert_eq!(router.core().registry().active_count(), 0);
    }

    #[tokio::test]
    async fn join_acks_joiner_and_announces_to_others_only() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;

        let outbox = join(&router, &bob, room).await;

        assert_eq!(
            outbox.events_for(bob.id),
            vec![&ServerEvent::RoomJoined { room_id: room }]
        );
        assert_eq!(
            outbox.events_for(alice.id),
            vec![&ServerEvent::PresenceChanged {
                room_id: room,
                user_id: bob.user,
                online: true
            }]
        );
    }

    #[tokio::test]
    async fn second_device_join_is_silent_for_other_members() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob_phone = connect(&router, UserId::generate()).await;
        let bob_laptop = connect(&router, bob_phone.user).await;
        join(&router, &alice, room).await;
        join(&router, &bob_phone, room).await;

        let outbox = join(&router, &bob_laptop, room).await;

        assert!(outbox.events_for(alice.id).is_empty());
        assert_eq!(outbox.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn message_from_non_member_is_rejected_to_sender_only() {
        let mut store = MockMessageStore::new();
        store.expect_append().never();
        let router = router_with(store);
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &bob, room).await;

        let outbox = router
            .handle(
                alice.id,
                ClientEvent::Message {
                    room_id: room,
                    body: "hi".into(),
                },
            )
            .await;

        assert_eq!(error_code(&outbox, alice.id).as_deref(), Some("NotAMember"));
        assert!(outbox.events_for(bob.id).is_empty());
    }

    #[tokio::test]
    async fn invalid_bodies_are_neither_persisted_nor_fanned_out() {
        let mut store = MockMessageStore::new();
        store.expect_append().never();
        let router = router_with(store);
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;

        let empty = router
            .handle(
                alice.id,
                ClientEvent::Message {
                    room_id: room,
                    body: "   ".into(),
                },
            )
            .await;
        assert_eq!(error_code(&empty, alice.id).as_deref(), Some("EmptyMessage"));

        let long = router
            .handle(
                alice.id,
                ClientEvent::Message {
                    room_id: room,
                    body: "x".repeat(4001),
                },
            )
            .await;
        assert_eq!(error_code(&long, alice.id).as_deref(), Some("MessageTooLong"));
    }

    #[tokio::test]
    async fn persistence_failure_reports_error_and_skips_fan_out() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_| Err(StoreError::unavailable("database is down")));
        let router = router_with(store);
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;

        let outbox = router
            .handle(
                alice.id,
                ClientEvent::Message {
                    room_id: room,
                    body: "hi".into(),
                },
            )
            .await;

        assert_eq!(error_code(&outbox, alice.id).as_deref(), Some("PersistenceError"));
        assert!(outbox.events_for(bob.id).is_empty());
        assert!(!outbox.is_sequenced());
    }

    #[tokio::test]
    async fn persisted_message_goes_to_the_whole_room_in_sequence() {
        let mut store = MockMessageStore::new();
        store.expect_append().returning(|message| Ok(message.id));
        let router = router_with(store);
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;

        let mut sequences = Vec::new();
        for body in ["first", "second"] {
            let outbox = router
                .route(
                    alice.id,
                    ClientEvent::Message {
                        room_id: room,
                        body: body.into(),
                    },
                )
                .await
                .unwrap();
            assert!(outbox.is_sequenced());
            assert_eq!(outbox.events_for(alice.id), outbox.events_for(bob.id));

            match outbox.events_for(bob.id).as_slice() {
                [ServerEvent::NewMessage {
                    sender_user_id,
                    body: delivered,
                    sequence,
                    ..
                }] => {
                    assert_eq!(*sender_user_id, alice.user);
                    assert_eq!(delivered, body);
                    sequences.push(*sequence);
                }
                other => panic!("unexpected events: {other:?}"),
            }
        }
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn sending_clears_the_senders_typing_state() {
        let mut store = MockMessageStore::new();
        store.expect_append().returning(|message| Ok(message.id));
        let router = router_with(store);
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;

        router
            .route(alice.id, ClientEvent::Typing { room_id: room })
            .await
            .unwrap();
        assert!(router.core().presence().is_typing(room, alice.user));

        router
            .route(
                alice.id,
                ClientEvent::Message {
                    room_id: room,
                    body: "done".into(),
                },
            )
            .await
            .unwrap();
        assert!(!router.core().presence().is_typing(room, alice.user));
    }

    #[tokio::test]
    async fn typing_is_not_echoed_to_any_of_the_users_devices() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice_phone = connect(&router, UserId::generate()).await;
        let alice_laptop = connect(&router, alice_phone.user).await;
        let bob = connect(&router, UserId::generate()).await;
        for client in [&alice_phone, &alice_laptop, &bob] {
            join(&router, client, room).await;
        }

        let outbox = router
            .route(alice_phone.id, ClientEvent::Typing { room_id: room })
            .await
            .unwrap();

        assert!(outbox.events_for(alice_phone.id).is_empty());
        assert!(outbox.events_for(alice_laptop.id).is_empty());
        assert_eq!(
            outbox.events_for(bob.id),
            vec![&ServerEvent::TypingChanged {
                room_id: room,
                user_id: alice_phone.user
            }]
        );
    }

    #[tokio::test]
    async fn only_the_sender_may_edit_a_message() {
        let room = RoomId::generate();
        let alice_id = UserId::generate();
        let original = stored(room, alice_id, "helo");
        let message_id = original.id;

        let mut store = MockMessageStore::new();
        let found = original.clone();
        store
            .expect_find()
            .returning(move |_| Ok(Some(found.clone())));
        store
            .expect_edit()
            .times(1)
            .returning(move |_, body, at| Ok(original.revised(body, at)));
        let router = router_with(store);

        let alice = connect(&router, alice_id).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;

        let denied = router
            .handle(
                bob.id,
                ClientEvent::Edit {
                    room_id: room,
                    message_id,
                    body: "hacked".into(),
                },
            )
            .await;
        assert_eq!(error_code(&denied, bob.id).as_deref(), Some("NotMessageOwner"));

        let outbox = router
            .route(
                alice.id,
                ClientEvent::Edit {
                    room_id: room,
                    message_id,
                    body: "hello".into(),
                },
            )
            .await
            .unwrap();
        match outbox.events_for(bob.id).as_slice() {
            [ServerEvent::MessageEdited {
                id, body, sequence, ..
            }] => {
                assert_eq!(*id, message_id);
                assert_eq!(body, "hello");
                assert_eq!(*sequence, 1);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_a_message_from_another_room_is_not_found() {
        let room = RoomId::generate();
        let alice_id = UserId::generate();
        let elsewhere = stored(RoomId::generate(), alice_id, "hi");
        let message_id = elsewhere.id;

        let mut store = MockMessageStore::new();
        store
            .expect_find()
            .returning(move |_| Ok(Some(elsewhere.clone())));
        store.expect_delete().never();
        let router = router_with(store);

        let alice = connect(&router, alice_id).await;
        join(&router, &alice, room).await;

        let outbox = router
            .handle(
                alice.id,
                ClientEvent::Delete {
                    room_id: room,
                    message_id,
                },
            )
            .await;
        assert_eq!(error_code(&outbox, alice.id).as_deref(), Some("MessageNotFound"));
    }

    #[tokio::test]
    async fn delete_fans_out_to_the_room() {
        let room = RoomId::generate();
        let alice_id = UserId::generate();
        let original = stored(room, alice_id, "oops");
        let message_id = original.id;

        let mut store = MockMessageStore::new();
        let found = original.clone();
        store
            .expect_find()
            .returning(move |_| Ok(Some(found.clone())));
        store.expect_delete().times(1).returning(move |_, _| {
            let mut deleted = original.clone();
            deleted.is_deleted = true;
            Ok(deleted)
        });
        let router = router_with(store);

        let alice = connect(&router, alice_id).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;

        let outbox = router
            .route(
                alice.id,
                ClientEvent::Delete {
                    room_id: room,
                    message_id,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            outbox.events_for(bob.id).as_slice(),
            [ServerEvent::MessageDeleted { id, .. }] if *id == message_id
        ));
    }

    #[tokio::test]
    async fn zero_page_limit_still_returns_one_message() {
        let room = RoomId::generate();
        let sender = UserId::generate();
        let latest = stored(room, sender, "latest");

        let mut store = MockMessageStore::new();
        store
            .expect_history()
            .withf(move |r, limit, _| *r == room && *limit == 1)
            .times(2)
            .returning(move |_, _, _| Ok(vec![latest.clone()]));
        let router = router_with_settings(
            store,
            RealtimeConfig {
                send_timeout_ms: 50,
                history_page_limit: 0,
                ..RealtimeConfig::default()
            },
        );

        for requested in [None, Some(50)] {
            let page = router.load_history(room, requested, None).await.unwrap();
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].body, "latest");
        }
    }

    #[tokio::test]
    async fn history_is_clamped_and_replied_to_the_requester_only() {
        let room = RoomId::generate();
        let sender = UserId::generate();
        let mut removed = stored(room, sender, "gone");
        removed.is_deleted = true;
        let page = vec![stored(room, sender, "one"), removed, stored(room, sender, "two")];

        let mut store = MockMessageStore::new();
        store
            .expect_history()
            .withf(move |r, limit, before| *r == room && *limit == 100 && before.is_none())
            .times(1)
            .returning(move |_, _, _| Ok(page.clone()));
        let router = router_with(store);

        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;

        let outbox = router
            .route(
                alice.id,
                ClientEvent::History {
                    room_id: room,
                    limit: Some(10_000),
                    before: None,
                },
            )
            .await
            .unwrap();

        assert!(outbox.events_for(bob.id).is_empty());
        match outbox.events_for(alice.id).as_slice() {
            [ServerEvent::History { messages, .. }] => {
                let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();
                assert_eq!(bodies, vec!["one", "two"]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_read_reaches_other_members() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;
        let message_id = MessageId::generate();

        let outbox = router
            .route(
                bob.id,
                ClientEvent::MarkRead {
                    room_id: room,
                    message_id,
                },
            )
            .await
            .unwrap();

        assert!(outbox.events_for(bob.id).is_empty());
        assert_eq!(
            outbox.events_for(alice.id),
            vec![&ServerEvent::MessageRead {
                room_id: room,
                message_id,
                user_id: bob.user
            }]
        );
    }

    #[tokio::test]
    async fn last_member_leaving_restarts_the_room_sequence() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;
        join(&router, &bob, room).await;
        let sequencer = router.core().sequencer();
        sequencer.acquire(room).await.next_sequence();

        router.route(alice.id, ClientEvent::Leave { room_id: room }).await.unwrap();
        assert_eq!(sequencer.lane_count(), 1);

        router.disconnect(bob.id);
        assert_eq!(sequencer.lane_count(), 0);
        assert_eq!(sequencer.acquire(room).await.next_sequence(), 1);
    }

    #[tokio::test]
    async fn leave_requires_membership_and_announces_offline() {
        let router = router_with(MockMessageStore::new());
        let room = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        join(&router, &alice, room).await;

        let not_member = router
            .handle(bob.id, ClientEvent::Leave { room_id: room })
            .await;
        assert_eq!(error_code(&not_member, bob.id).as_deref(), Some("NotAMember"));

        join(&router, &bob, room).await;
        let outbox = router
            .route(bob.id, ClientEvent::Leave { room_id: room })
            .await
            .unwrap();

        assert_eq!(
            outbox.events_for(bob.id),
            vec![&ServerEvent::RoomLeft { room_id: room }]
        );
        assert_eq!(
            outbox.events_for(alice.id),
            vec![&ServerEvent::PresenceChanged {
                room_id: room,
                user_id: bob.user,
                online: false
            }]
        );
    }

    #[tokio::test]
    async fn disconnect_removes_the_connection_from_every_room() {
        let router = router_with(MockMessageStore::new());
        let general = RoomId::generate();
        let random = RoomId::generate();
        let alice = connect(&router, UserId::generate()).await;
        let bob = connect(&router, UserId::generate()).await;
        for room in [general, random] {
            join(&router, &alice, room).await;
            join(&router, &bob, room).await;
        }

        let outbox = router.disconnect(bob.id);

        assert_eq!(outbox.events_for(alice.id).len(), 2);
        for room in [general, random] {
            assert!(!router.core().rooms().members_of(room).contains(&bob.id));
        }

        // 已关闭的连接再发事件
        let after = router.handle(bob.id, ClientEvent::Join { room_id: general }).await;
        assert_eq!(error_code(&after, bob.id).as_deref(), Some("NotAuthenticated"));
        assert!(router.disconnect(bob.id).is_empty());
    }
}
