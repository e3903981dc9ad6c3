//! End-to-end delivery scenarios through the hub.

use herald_core::store::{MemoryMessageStore, MemoryPresenceStore, SqliteDirectory, SqliteMessageStore};
use herald_core::{
    Backends, ConnectionHandle, ConnectionId, ContactStatus, Dispatched, DropReason,
    EventReceiver, Hub, LocalRegistry, MessageStore, RouteOutcome, Session, StaticDirectory,
};
use herald_protocol::{AnnouncePresence, ClientEvent, SendMessage, ServerEvent};
use std::sync::Arc;

struct World {
    hub: Hub,
    messages: Arc<dyn MessageStore>,
}

fn memory_world() -> World {
    let directory = Arc::new(StaticDirectory::new());
    directory.add_user("u-ahmed", "ahmed");
    directory.add_user("u-mona", "mona");
    directory.add_user("u-carol", "carol");
    directory.set_contact("u-mona", "u-ahmed", ContactStatus::Accepted);

    let messages: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let hub = Hub::new(Backends {
        presence: Arc::new(MemoryPresenceStore::new()),
        messages: messages.clone(),
        contacts: directory.clone(),
        identities: directory,
        registry: Arc::new(LocalRegistry::new()),
    });
    World { hub, messages }
}

async fn sqlite_world() -> World {
    let pool = herald_core::store::sqlite::open_pool("sqlite::memory:")
        .await
        .unwrap();
    let directory = Arc::new(SqliteDirectory::new(pool.clone()));
    directory.ensure_schema().await.unwrap();
    sqlx::query(
        "INSERT INTO users (id, username) VALUES ('u-ahmed', 'ahmed'), ('u-mona', 'mona'), ('u-carol', 'carol')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO contacts (user_id, friend_id, status) VALUES ('u-mona', 'u-ahmed', 'accepted')")
        .execute(&pool)
        .await
        .unwrap();

    let store = SqliteMessageStore::from_pool(pool);
    store.migrate().await.unwrap();
    let messages: Arc<dyn MessageStore> = Arc::new(store);

    let hub = Hub::new(Backends {
        presence: Arc::new(MemoryPresenceStore::new()),
        messages: messages.clone(),
        contacts: directory.clone(),
        identities: directory,
        registry: Arc::new(LocalRegistry::new()),
    });
    World { hub, messages }
}

fn connect(hub: &Hub) -> (Session, EventReceiver) {
    let (handle, rx) = ConnectionHandle::channel(ConnectionId::generate());
    (hub.open_session(handle), rx)
}

async fn announce(hub: &Hub, session: &mut Session, username: &str, platform: &str) -> Dispatched {
    hub.dispatch(
        session,
        ClientEvent::AnnouncePresence(AnnouncePresence::new(username, platform, "online")),
    )
    .await
}

async fn send(hub: &Hub, session: &mut Session, to: &str, platform: &str, content: &str) -> Dispatched {
    hub.dispatch(
        session,
        ClientEvent::SendMessage(SendMessage::new("ahmed", to, platform, content)),
    )
    .await
}

fn received(rx: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::ReceiveMessage(_) = *event {
            events.push((*event).clone());
        }
    }
    events
}

async fn offline_then_drain(world: World) {
    let (mut ahmed, _ahmed_rx) = connect(&world.hub);
    announce(&world.hub, &mut ahmed, "ahmed", "desktop").await;

    let result = send(&world.hub, &mut ahmed, "mona", "phone", "hi").await;
    assert!(matches!(result, Dispatched::Routed(RouteOutcome::Queued(_))));
    let queued = world.messages.pending("u-mona", "phone").await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].sender_id, "u-ahmed");
    assert!(!queued[0].delivered);

    let (mut mona, mut mona_rx) = connect(&world.hub);
    let result = announce(&world.hub, &mut mona, "mona", "phone").await;
    let Dispatched::Announced(announced) = result else {
        panic!("expected announcement, got {result:?}");
    };
    assert_eq!(announced.drain.emitted, 1);

    assert_eq!(
        received(&mut mona_rx),
        vec![ServerEvent::receive_message("ahmed", "mona", "hi", "phone")]
    );
    assert!(world.messages.pending("u-mona", "phone").await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_message_is_drained_on_connect() {
    offline_then_drain(memory_world()).await;
}

#[tokio::test]
async fn offline_message_is_drained_on_connect_sqlite() {
    offline_then_drain(sqlite_world().await).await;
}

#[tokio::test]
async fn drain_preserves_fifo_order() {
    let world = memory_world();
    let (mut ahmed, _rx) = connect(&world.hub);
    for content in ["first", "second", "third"] {
        send(&world.hub, &mut ahmed, "mona", "phone", content).await;
    }

    let (mut mona, mut mona_rx) = connect(&world.hub);
    announce(&world.hub, &mut mona, "mona", "phone").await;

    let contents: Vec<String> = received(&mut mona_rx)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::ReceiveMessage(m) => Some(m.content),
            _ => None,
        })
        .collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn live_recipient_gets_multicast_and_nothing_is_queued() {
    let world = memory_world();
    let (mut mona_phone, mut phone_rx) = connect(&world.hub);
    let (mut mona_phone_2, mut phone_rx_2) = connect(&world.hub);
    announce(&world.hub, &mut mona_phone, "mona", "phone").await;
    announce(&world.hub, &mut mona_phone_2, "mona", "phone").await;

    let (mut ahmed, _rx) = connect(&world.hub);
    let result = send(&world.hub, &mut ahmed, "mona", "phone", "hello").await;
    assert!(matches!(
        result,
        Dispatched::Routed(RouteOutcome::Delivered { recipients: 2 })
    ));

    assert_eq!(received(&mut phone_rx).len(), 1);
    assert_eq!(received(&mut phone_rx_2).len(), 1);
    assert!(world.messages.pending("u-mona", "phone").await.unwrap().is_empty());
}

#[tokio::test]
async fn non_contact_message_leaves_no_trace() {
    let world = memory_world();
    let (mut carol, mut carol_rx) = connect(&world.hub);
    announce(&world.hub, &mut carol, "carol", "phone").await;

    let (mut ahmed, mut ahmed_rx) = connect(&world.hub);
    let result = send(&world.hub, &mut ahmed, "carol", "phone", "psst").await;
    assert!(matches!(
        result,
        Dispatched::Routed(RouteOutcome::Dropped(DropReason::NotAContact))
    ));

    assert!(received(&mut carol_rx).is_empty());
    assert!(received(&mut ahmed_rx).is_empty());
    assert!(world.messages.pending("u-carol", "phone").await.unwrap().is_empty());
}

#[tokio::test]
async fn disconnect_makes_device_offline_again() {
    let world = memory_world();
    let (mut mona, _mona_rx) = connect(&world.hub);
    announce(&world.hub, &mut mona, "mona", "phone").await;
    assert_eq!(world.hub.close(mona).await, 1);
    assert!(world.hub.presence().presence_of("mona").await.unwrap().is_none());

    let (mut ahmed, _rx) = connect(&world.hub);
    let result = send(&world.hub, &mut ahmed, "mona", "phone", "are you there?").await;
    assert!(matches!(result, Dispatched::Routed(RouteOutcome::Queued(_))));
}

#[tokio::test]
async fn hyphenated_username_does_not_capture_another_users_device() {
    let world = memory_world();
    let (mut lookalike, mut lookalike_rx) = connect(&world.hub);
    announce(&world.hub, &mut lookalike, "mona-phone", "").await;

    let (mut ahmed, _rx) = connect(&world.hub);
    let result = send(&world.hub, &mut ahmed, "mona", "phone", "secret").await;
    assert!(matches!(result, Dispatched::Routed(RouteOutcome::Queued(_))));

    assert!(received(&mut lookalike_rx).is_empty());
    assert_eq!(world.messages.pending("u-mona", "phone").await.unwrap().len(), 1);
}

#[tokio::test]
async fn platform_spacing_does_not_split_the_queue() {
    let world = memory_world();
    let (mut ahmed, _rx) = connect(&world.hub);
    let result = send(&world.hub, &mut ahmed, "mona", "my phone", "hi").await;
    let Dispatched::Routed(RouteOutcome::Queued(queued)) = result else {
        panic!("expected queued, got {result:?}");
    };
    assert_eq!(queued.recipient_agent, "my_phone");

    let (mut mona, mut mona_rx) = connect(&world.hub);
    let result = announce(&world.hub, &mut mona, "mona", "my  phone").await;
    let Dispatched::Announced(announced) = result else {
        panic!("expected announcement, got {result:?}");
    };
    assert_eq!(announced.drain.emitted, 1);
    assert_eq!(
        received(&mut mona_rx),
        vec![ServerEvent::receive_message("ahmed", "mona", "hi", "my_phone")]
    );
    assert!(world.messages.pending("u-mona", "my_phone").await.unwrap().is_empty());

    let result = send(&world.hub, &mut ahmed, "mona", "my phone", "again").await;
    assert!(matches!(
        result,
        Dispatched::Routed(RouteOutcome::Delivered { recipients: 1 })
    ));
}
