use std::{sync::Arc, time::Duration};

use domain::{permission, RoomType, REMOVED_MESSAGE_TEXT};
use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    error::PROTOCOL_CLOSE_CODE,
    events::{EventChannel, Priority},
    protocol::{self, ProtocolVersion},
    server::{ChatServer, ChatServerDependencies, ContextMenuEntry, ServerSettings},
    session::Connection,
    storage::{MemoryStorage, Storage},
    testing::{
        close_of, texts, types, Harness, PlainHasher, PrefixUploads, INFINITE_CODE, PASSWORD,
    },
    upload::MockUploadStore,
};

// ----- 连接与 v0 -----

#[tokio::test]
async fn welcome_payload_is_sent_on_open() {
    let harness = Harness::new().await;
    let mut client = harness.connect_raw().await;

    let packets = client.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["type"], "connect");
    assert_eq!(packets[0]["protocols"], json!(["v1"]));
    assert_eq!(packets[0]["serverName"], "Test Server");
}

#[tokio::test]
async fn welcome_payload_carries_listener_additions() {
    let harness = Harness::unstarted(Arc::new(PrefixUploads));
    harness
        .server
        .events()
        .listen_fn(EventChannel::ConnectionNew, Priority::Normal, |event| {
            event.set("themes", json!(["dark", "light"]))
        })
        .await
        .unwrap();
    harness.server.start(&[]).await.unwrap();

    let mut client = harness.connect_raw().await;
    let packets = client.packets();
    assert_eq!(packets[0]["themes"], json!(["dark", "light"]));
}

#[tokio::test]
async fn cancelled_connection_is_closed() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::ConnectionNew, Priority::Early, |event| {
            event.cancel()
        })
        .await
        .unwrap();

    let mut client = harness.connect_raw().await;
    let frames = client.drain();
    assert!(texts(&frames).is_empty());
    assert_eq!(
        close_of(&frames),
        Some((PROTOCOL_CLOSE_CODE, "Connection refused".to_string()))
    );
}

#[tokio::test]
async fn malformed_json_closes_without_dispatch() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client.send_text("{not json").await;
    let frames = client.drain();
    assert!(texts(&frames).is_empty());
    assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
}

#[tokio::test]
async fn unknown_v0_packet_is_fatal() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client.send(json!({"type": "message", "text": "hi"})).await;
    let frames = client.drain();
    assert_eq!(texts(&frames)[0]["message"], "Unknown packet type");
    assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
}

#[tokio::test]
async fn missing_type_is_fatal() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client.send(json!({"email": "a@b.com"})).await;
    let frames = client.drain();
    assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
}

fn signup(email: &str, user_name: &str, code: &str) -> serde_json::Value {
    json!({
        "type": "signup",
        "email": email,
        "password": PASSWORD,
        "userName": user_name,
        "signUp": code,
    })
}

#[tokio::test]
async fn signup_consumes_token_exactly_once() {
    let harness = Harness::new().await;
    let token = harness.storage.generate_sign_up("user").await.unwrap();
    let mut client = harness.connect().await;

    client.send(signup("a@b.com", "Alice", &token.token)).await;
    assert_eq!(client.types(), vec!["refreshNow"]);

    let accounts = harness.storage.get_all_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].group, "user");
    assert_eq!(accounts[0].name, "Alice");
    assert_ne!(accounts[0].password.as_str(), PASSWORD);

    let mut second = harness.connect().await;
    second.send(signup("c@d.com", "Carol", &token.token)).await;
    let frames = second.drain();
    assert_eq!(texts(&frames)[0]["message"], "Invalid or expired signup code");
    assert_eq!(close_of(&frames), None);
    assert_eq!(harness.storage.get_all_accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn infinite_code_is_not_consumed() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client.send(signup("a@b.com", "Alice", INFINITE_CODE)).await;
    client.send(signup("c@d.com", "Carol", INFINITE_CODE)).await;
    assert_eq!(client.types(), vec!["refreshNow", "refreshNow"]);
    assert_eq!(harness.storage.get_all_accounts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn signup_shape_is_validated_before_storage() {
    let harness = Harness::new().await;
    let token = harness.storage.generate_sign_up("user").await.unwrap();
    let mut client = harness.connect().await;

    client.send(signup("not-an-email", "Alice", &token.token)).await;
    client.send(signup("a@b.com", "A!", &token.token)).await;
    client
        .send(json!({
            "type": "signup",
            "email": "a@b.com",
            "password": "short",
            "userName": "Alice",
            "signUp": token.token,
        }))
        .await;

    let frames = client.drain();
    let errors = texts(&frames);
    assert_eq!(types(&errors), vec!["error", "error", "error"]);
    assert_eq!(errors[0]["message"], "Invalid email address");
    assert_eq!(errors[2]["message"], "Password must be at least 7 characters");
    assert_eq!(close_of(&frames), None);
    assert!(harness.storage.check_sign_up(&token.token).await.unwrap().is_some());
}

#[tokio::test]
async fn usercreate_veto_blocks_signup_and_hides_credentials_from_final() {
    let harness = Harness::new().await;
    let events = harness.server.events();
    let (tx, mut rx) = mpsc::unbounded_channel();
    events
        .listen_fn(EventChannel::UserCreate, Priority::Final, move |event| {
            let _ = tx.send(event.get_str("password").map(str::to_string));
        })
        .await
        .unwrap();

    let mut client = harness.connect().await;
    client.send(signup("a@b.com", "Alice", INFINITE_CODE)).await;
    assert_eq!(client.types(), vec!["refreshNow"]);
    assert!(rx.try_recv().is_err());

    events
        .listen_fn(EventChannel::UserCreate, Priority::Early, |event| {
            if event.get_str("userName") == Some("Mallory") {
                event.cancel_with_reason("Name is reserved");
            }
        })
        .await
        .unwrap();
    client.send(signup("m@b.com", "Mallory", INFINITE_CODE)).await;
    let packets = client.packets();
    assert_eq!(packets[0]["message"], "Name is reserved");
    assert_eq!(harness.storage.get_all_accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn login_with_unknown_email_is_denied() {
    let harness = Harness::new().await;
    harness.account("alice", "user").await;

    for email in ["nobody@example.com", "alice@example.com"] {
        let mut client = harness.connect().await;
        let password = if email.starts_with("alice") { "wrong-password" } else { PASSWORD };
        client
            .send(json!({"type": "login", "email": email, "password": password, "protocol": "v1"}))
            .await;
        let frames = client.drain();
        let packets = texts(&frames);
        assert_eq!(packets, vec![json!({"type": "error", "message": "Permission denied"})]);
        assert_eq!(
            close_of(&frames),
            Some((PROTOCOL_CLOSE_CODE, "Permission denied".to_string()))
        );
        assert_eq!(client.connection.protocol().await, ProtocolVersion::V0);
    }
}

#[tokio::test]
async fn failed_login_is_announced_with_email_only() {
    let harness = Harness::new().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .server
        .events()
        .listen_fn(EventChannel::UserFailedAuth, Priority::Monitor, move |event| {
            let _ = tx.send(event.data.clone());
        })
        .await
        .unwrap();

    let mut client = harness.connect().await;
    client
        .send(json!({"type": "login", "email": "x@y.com", "password": "whatever1", "protocol": "v1"}))
        .await;

    let data = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data["email"], "x@y.com");
}

#[tokio::test]
async fn unsupported_protocol_is_fatal() {
    let harness = Harness::new().await;
    let account = harness.account("alice", "user").await;

    for protocol in [json!("v0"), json!("v9"), json!(null)] {
        let mut client = harness.connect().await;
        client
            .send(json!({
                "type": "login",
                "email": account.email.as_str(),
                "password": PASSWORD,
                "protocol": protocol,
            }))
            .await;
        let frames = client.drain();
        assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
        assert!(!harness.server.sessions().contains(client.connection.id()).await);
    }
}

#[tokio::test]
async fn login_switches_to_v1_and_sends_welcome_sequence() {
    let harness = Harness::new().await;
    let account = harness.account("alice", "admin").await;
    let mut client = harness.connect().await;

    client
        .send(json!({
            "type": "login",
            "email": account.email.as_str(),
            "password": PASSWORD,
            "protocol": "v1",
        }))
        .await;

    let packets = client.packets();
    assert_eq!(
        types(&packets),
        vec!["login", "updatePerms", "updateGroups", "updateRooms", "updateUsers"]
    );
    assert_eq!(packets[0]["success"], true);
    assert_eq!(packets[0]["userid"], json!(account.id));
    assert_eq!(packets[0]["userName"], "alice");
    assert!(packets[1]["perms"]
        .as_array()
        .unwrap()
        .contains(&json!(permission::CREATE_ROOM)));
    let users = packets[4]["userList"].as_array().unwrap();
    assert_eq!(users[0]["online"], true);

    let state = client.connection.state().await;
    assert_eq!(state.protocol, ProtocolVersion::V1);
    assert_eq!(state.user_id, Some(account.id));
    assert!(harness.server.sessions().contains(client.connection.id()).await);
}

#[tokio::test]
async fn new_login_is_broadcast_to_existing_sessions() {
    let harness = Harness::new().await;
    let (mut alice, _) = harness.login("alice", "user").await;
    let (_bob, bob_account) = harness.login("bob", "user").await;

    let packets = alice.packets();
    let users = packets
        .iter()
        .rev()
        .find(|p| p["type"] == "updateUsers")
        .unwrap();
    let bob = users["userList"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["id"] == json!(bob_account.id))
        .unwrap();
    assert_eq!(bob["online"], true);
}

#[tokio::test]
async fn userauth_veto_denies_login() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::UserAuth, Priority::Normal, |event| event.cancel())
        .await
        .unwrap();
    let account = harness.account("alice", "user").await;
    let mut client = harness.connect().await;

    client
        .send(json!({
            "type": "login",
            "email": account.email.as_str(),
            "password": PASSWORD,
            "protocol": "v1",
        }))
        .await;
    let frames = client.drain();
    assert_eq!(texts(&frames)[0]["message"], "Permission denied");
    assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
    assert_eq!(client.connection.user_id().await, None);
}

// ----- v1：消息 -----

#[tokio::test]
async fn message_is_delivered_to_everyone_once_with_server_userid() {
    let harness = Harness::new().await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, alice_account) = harness.login("alice", "user").await;
    let (mut bob, _) = harness.login("bob", "user").await;
    alice.drain();

    alice
        .send(json!({
            "type": "message",
            "roomid": room.id,
            "text": "hi",
            "userid": uuid::Uuid::new_v4(),
        }))
        .await;

    for client in [&mut alice, &mut bob] {
        let packets = client.packets();
        assert_eq!(types(&packets), vec!["sendMessage"]);
        assert_eq!(packets[0]["roomid"], json!(room.id));
        assert_eq!(packets[0]["message"]["text"], "hi");
        assert_eq!(packets[0]["message"]["userid"], json!(alice_account.id));
        assert_eq!(packets[0]["message"]["idx"], 0);
    }
}

#[tokio::test]
async fn messagecreate_listeners_can_rewrite_text() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::MessageCreate, Priority::Normal, |event| {
            let censored = event.get_str("text").unwrap_or_default().replace("darn", "****");
            event.set("text", censored);
        })
        .await
        .unwrap();
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    alice
        .send(json!({"type": "message", "roomid": room.id, "text": "darn it"}))
        .await;
    let packets = alice.packets();
    assert_eq!(packets[0]["message"]["text"], "**** it");
    let stored = harness.storage.get_message(room.id, 0).await.unwrap().unwrap();
    assert_eq!(stored.text, "**** it");
}

#[tokio::test]
async fn messagesend_veto_stores_nothing() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::MessageSend, Priority::Early, |event| {
            event.cancel_with_reason("Slow down")
        })
        .await
        .unwrap();
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    alice
        .send(json!({"type": "message", "roomid": room.id, "text": "spam"}))
        .await;
    let packets = alice.packets();
    assert_eq!(packets, vec![json!({"type": "error", "message": "Slow down"})]);
    assert_eq!(harness.storage.get_message(room.id, 0).await.unwrap(), None);
}

#[tokio::test]
async fn getmessages_defaults_to_newest_segment() {
    let harness = Harness::new().await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;
    for n in 0..7 {
        alice
            .send(json!({"type": "message", "roomid": room.id, "text": format!("m{n}")}))
            .await;
    }
    alice.drain();

    alice.send(json!({"type": "getmessages", "roomid": room.id})).await;
    let packets = alice.packets();
    assert_eq!(packets[0]["type"], "updateText");
    assert_eq!(packets[0]["segment"], 1);
    let idxs: Vec<_> = packets[0]["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["idx"].as_u64().unwrap())
        .collect();
    assert_eq!(idxs, vec![5, 6]);

    alice
        .send(json!({"type": "getmessages", "roomid": room.id, "segment": 0}))
        .await;
    let packets = alice.packets();
    assert_eq!(packets[0]["messages"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn message_upload_attaches_url_and_dimensions() {
    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    let mut uploads = MockUploadStore::new();
    uploads
        .expect_store()
        .times(1)
        .returning(|path, _| Ok(format!("/uploads/{path}")));
    let harness = Harness::with_uploads(Arc::new(uploads)).await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, account) = harness.login("alice", "user").await;

    alice
        .send(json!({
            "type": "message",
            "roomid": room.id,
            "text": "",
            "upload": {"filename": "dot.png", "data": format!("data:image/png;base64,{PNG_1X1}")},
        }))
        .await;

    let packets = alice.packets();
    let message = &packets[0]["message"];
    let url = message["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("/uploads/{}/", account.id)));
    assert!(url.ends_with("-dot.png"));
    assert_eq!(message["img"], message["url"]);
    assert_eq!(message["width"], 1);
    assert_eq!(message["height"], 1);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut uploads = MockUploadStore::new();
    uploads.expect_store().never();
    let harness = Harness::with_uploads(Arc::new(uploads)).await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    let big = base64_of(&vec![0u8; 4096]);
    alice
        .send(json!({
            "type": "message",
            "roomid": room.id,
            "text": "file",
            "upload": {"filename": "big.bin", "data": big},
        }))
        .await;
    let packets = alice.packets();
    assert_eq!(packets[0]["type"], "error");
    assert_eq!(packets[0]["message"], "Upload exceeds the 1024 byte limit");
    assert_eq!(harness.storage.get_message(room.id, 0).await.unwrap(), None);
}

fn base64_of(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

#[tokio::test]
async fn updatemessage_broadcasts_segment_and_remove_redacts() {
    let harness = Harness::new().await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, _) = harness.login("bob", "user").await;
    for n in 0..7 {
        bob.send(json!({"type": "message", "roomid": room.id, "text": format!("m{n}")}))
            .await;
    }
    admin.drain();
    bob.drain();

    admin
        .send(json!({"type": "updatemessage", "roomid": room.id, "idx": 6, "text": "edited"}))
        .await;
    let packets = bob.packets();
    assert_eq!(packets[0]["type"], "updateText");
    assert_eq!(packets[0]["segment"], 1);
    assert_eq!(packets[0]["messages"][1]["text"], "edited");

    admin
        .send(json!({"type": "removemessage", "roomid": room.id, "idx": 2}))
        .await;
    let packets = admin.packets();
    let messages = packets[0]["messages"].as_array().unwrap();
    assert_eq!(messages[2]["text"], REMOVED_MESSAGE_TEXT);
    assert_eq!(messages[2]["userid"], json!(null));
    assert_eq!(messages[3]["idx"], 3);
    assert_eq!(messages[3]["text"], "m3");
}

#[tokio::test]
async fn messagechange_veto_leaves_message_untouched() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::MessageChange, Priority::Early, |event| {
            if event.get("removed") == Some(&json!(true)) {
                event.cancel();
            }
        })
        .await
        .unwrap();
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut admin, _) = harness.login("admin", "admin").await;
    admin
        .send(json!({"type": "message", "roomid": room.id, "text": "keep me"}))
        .await;
    admin.drain();

    admin
        .send(json!({"type": "removemessage", "roomid": room.id, "idx": 0}))
        .await;
    assert_eq!(admin.types(), vec!["error"]);
    let stored = harness.storage.get_message(room.id, 0).await.unwrap().unwrap();
    assert_eq!(stored.text, "keep me");
}

// ----- v1：房间与在线状态 -----

#[tokio::test]
async fn join_and_leave_voice_room_updates_room_views() {
    let harness = Harness::new().await;
    let voice = harness.storage.create_room("lounge", RoomType::Voice).await.unwrap();
    let (mut alice, account) = harness.login("alice", "user").await;
    let (mut bob, _) = harness.login("bob", "user").await;
    alice.drain();

    alice.send(json!({"type": "joinroom", "roomid": voice.id})).await;
    let packets = bob.packets();
    assert_eq!(types(&packets), vec!["joinRoom", "updateRooms"]);
    let lounge = &packets[1]["roomList"][0];
    assert_eq!(lounge["id"], json!(voice.id));
    assert_eq!(lounge["userlist"][0]["userid"], json!(account.id));

    // 重复加入是空操作
    alice.drain();
    alice.send(json!({"type": "joinroom", "roomid": voice.id})).await;
    assert!(alice.packets().is_empty());

    alice.send(json!({"type": "leaveroom"})).await;
    let packets = bob.packets();
    assert_eq!(packets[0]["type"], "leaveRoom");
    let rooms = packets.iter().find(|p| p["type"] == "updateRooms").unwrap();
    assert_eq!(rooms["roomList"][0]["userlist"], json!([]));
    assert_eq!(alice.connection.state().await.current_room, None);
}

#[tokio::test]
async fn only_voice_rooms_can_be_joined() {
    let harness = Harness::new().await;
    let text = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    alice.send(json!({"type": "joinroom", "roomid": text.id})).await;
    let packets = alice.packets();
    assert_eq!(types(&packets), vec!["error"]);
    assert_eq!(alice.connection.state().await.current_room, None);
}

#[tokio::test]
async fn join_notifies_listeners() {
    let harness = Harness::new().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .server
        .events()
        .listen_fn(EventChannel::UserJoinRoom, Priority::Monitor, move |event| {
            let _ = tx.send(event.get("roomid").cloned());
        })
        .await
        .unwrap();
    let voice = harness.storage.create_room("lounge", RoomType::Voice).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    alice.send(json!({"type": "joinroom", "roomid": voice.id})).await;
    let roomid = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(roomid, Some(json!(voice.id)));
}

#[tokio::test]
async fn talking_is_broadcast_and_server_mute_silences() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    admin.drain();

    bob.send(json!({"type": "talking", "talking": true})).await;
    let packets = admin.packets();
    assert_eq!(packets[0], json!({"type": "talking", "userid": bob_account.id, "talking": true}));

    admin
        .send(json!({"type": "servermute", "userid": bob_account.id, "suppress": true}))
        .await;
    let state = bob.connection.state().await;
    assert!(state.suppressed);
    assert!(!state.talking);

    bob.drain();
    bob.send(json!({"type": "talking", "talking": true})).await;
    let packets = bob.packets();
    assert_eq!(packets[0]["talking"], false);
}

#[tokio::test]
async fn video_is_relayed_only_to_target() {
    let harness = Harness::new().await;
    let (mut alice, alice_account) = harness.login("alice", "user").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    let (mut carol, _) = harness.login("carol", "user").await;
    alice.drain();
    bob.drain();

    alice
        .send(json!({
            "type": "video",
            "touserid": bob_account.id,
            "candidate": {"sdpMid": "0"},
        }))
        .await;

    let packets = bob.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["type"], "video");
    assert_eq!(packets[0]["userid"], json!(alice_account.id));
    assert_eq!(packets[0]["candidate"]["sdpMid"], "0");
    assert!(carol.packets().is_empty());
    assert!(alice.packets().is_empty());
}

#[tokio::test]
async fn golive_and_letmesee() {
    let harness = Harness::new().await;
    let (mut alice, alice_account) = harness.login("alice", "user").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    alice.drain();

    alice
        .send(json!({"type": "golive", "livestate": true, "livelabel": "screen"}))
        .await;
    let packets = bob.packets();
    let users = packets.iter().find(|p| p["type"] == "updateUsers").unwrap();
    let alice_view = users["userList"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["id"] == json!(alice_account.id))
        .unwrap();
    assert_eq!(alice_view["liveState"], true);
    assert_eq!(alice_view["liveLabel"], "screen");

    bob.send(json!({"type": "letmesee", "touserid": alice_account.id}))
        .await;
    let packets = alice.packets();
    let ask = packets.iter().find(|p| p["type"] == "letmesee").unwrap();
    assert_eq!(ask["userid"], json!(bob_account.id));
}

// ----- v1：管理 -----

#[tokio::test]
async fn permission_denial_leaves_storage_untouched() {
    let harness = Harness::new().await;
    let text = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let voice = harness.storage.create_room("lounge", RoomType::Voice).await.unwrap();
    let victim = harness.account("victim", "user").await;
    let (mut mallory, mallory_account) = harness.login("mallory", "user").await;
    mallory
        .send(json!({"type": "message", "roomid": text.id, "text": "mine"}))
        .await;
    mallory.drain();

    let attempts = [
        (json!({"type": "createroom", "roomName": "x", "roomType": "text"}), permission::CREATE_ROOM),
        (json!({"type": "removeroom", "roomid": voice.id}), permission::REMOVE_ROOM),
        (json!({"type": "createuser", "userName": "eve", "email": "e@v.e"}), permission::CREATE_USER),
        (json!({"type": "updateuser", "userid": victim.id, "userName": "renamed"}), permission::RENAME_USER),
        (json!({"type": "removeuser", "userid": victim.id}), permission::REMOVE_USER),
        (json!({"type": "removeuser"}), permission::REMOVE_USER),
        (json!({"type": "updatemessage", "roomid": text.id, "idx": 0, "text": "x"}), permission::CHANGE_MESSAGE),
        (json!({"type": "removemessage", "roomid": text.id, "idx": 0}), permission::CHANGE_MESSAGE),
        (json!({"type": "setusergroup", "userid": mallory_account.id, "groupName": "admin"}), permission::SET_USER_GROUP),
        (json!({"type": "invite"}), permission::INVITE_USER_ANY),
        (json!({"type": "servermute", "userid": victim.id}), permission::SUPPRESS_USER),
        (json!({"type": "creategroup", "groupName": "mods", "perms": []}), permission::SET_GROUP_PERM),
        (json!({"type": "updategroup", "groupName": "user", "addPerms": ["createRoom"]}), permission::SET_GROUP_PERM),
        (json!({"type": "removegroup", "groupName": "user"}), permission::SET_GROUP_PERM),
    ];

    for (packet, perm) in attempts {
        let before = harness.storage.snapshot().await;
        mallory.send(packet.clone()).await;
        let frames = mallory.drain();
        let packets = texts(&frames);
        assert_eq!(
            packets,
            vec![json!({"type": "error", "message": format!("Permission denied \"{perm}\"")})],
            "packet {packet}"
        );
        assert_eq!(close_of(&frames), None);
        assert_eq!(harness.storage.snapshot().await, before, "packet {packet} mutated storage");
    }
}

#[tokio::test]
async fn admin_creates_and_removes_rooms() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, _) = harness.login("bob", "user").await;
    admin.drain();

    admin
        .send(json!({"type": "createroom", "roomName": "lounge", "roomType": "voice"}))
        .await;
    let packets = bob.packets();
    assert_eq!(types(&packets), vec!["updateRooms"]);
    assert_eq!(packets[0]["roomList"][0]["name"], "lounge");
    assert_eq!(packets[0]["roomList"][0]["type"], "voice");
    let room = harness.storage.get_all_rooms().await.unwrap().remove(0);

    bob.send(json!({"type": "joinroom", "roomid": room.id})).await;
    admin.send(json!({"type": "removeroom", "roomid": room.id})).await;
    assert!(harness.storage.get_all_rooms().await.unwrap().is_empty());
    assert_eq!(bob.connection.state().await.current_room, None);

    admin
        .send(json!({"type": "createroom", "roomName": "bad", "roomType": "video"}))
        .await;
    let packets = admin.packets();
    let error = packets.iter().find(|p| p["type"] == "error").unwrap();
    assert_eq!(error["message"], "Room type must be \"text\" or \"voice\"");
}

#[tokio::test]
async fn roomcreate_veto_blocks_creation() {
    let harness = Harness::new().await;
    harness
        .server
        .events()
        .listen_fn(EventChannel::RoomCreate, Priority::Early, |event| event.cancel())
        .await
        .unwrap();
    let (mut admin, _) = harness.login("admin", "admin").await;

    admin
        .send(json!({"type": "createroom", "roomName": "x", "roomType": "text"}))
        .await;
    assert_eq!(admin.types(), vec!["error"]);
    assert!(harness.storage.get_all_rooms().await.unwrap().is_empty());
}

#[tokio::test]
async fn createuser_reports_generated_password_to_admin() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;

    admin
        .send(json!({"type": "createuser", "userName": "newbie", "email": "new@b.com"}))
        .await;
    let packets = admin.packets();
    assert_eq!(types(&packets), vec!["adminMessage", "updateUsers"]);

    let created = harness
        .storage
        .get_account_by_email(&domain::UserEmail::parse("new@b.com").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.group, "user");
    let message = packets[0]["message"].as_str().unwrap();
    let password = message.rsplit(' ').next().unwrap();
    assert_eq!(password.len(), 12);
    assert_eq!(created.password.as_str(), format!("plain:{password}"));
}

#[tokio::test]
async fn users_can_rename_themselves() {
    let harness = Harness::new().await;
    let (mut alice, account) = harness.login("alice", "user").await;

    alice
        .send(json!({"type": "updateuser", "userName": "Alice Liddell", "hidden": true}))
        .await;
    let stored = harness.storage.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Alice Liddell");
    assert!(stored.hidden);
    assert_eq!(
        alice.connection.state().await.user_name.as_deref(),
        Some("Alice Liddell")
    );

    alice.drain();
    alice.send(json!({"type": "updateuser", "userName": "x"})).await;
    assert_eq!(alice.types(), vec!["error"]);
}

#[tokio::test]
async fn removeuser_disconnects_target_once() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    admin.drain();
    bob.drain();

    admin
        .send(json!({"type": "removeuser", "userid": bob_account.id}))
        .await;

    let frames = bob.drain();
    assert_eq!(
        close_of(&frames),
        Some((PROTOCOL_CLOSE_CODE, "Account removed".to_string()))
    );
    assert!(harness.storage.get_account(bob_account.id).await.unwrap().is_none());
    assert!(!harness.server.sessions().contains(bob.connection.id()).await);

    let packets = admin.packets();
    let disconnects = packets.iter().filter(|p| p["type"] == "disconnect").count();
    assert_eq!(disconnects, 1);

    // 传输层随后报告关闭时不再重复广播
    bob.close().await;
    assert!(admin.packets().iter().all(|p| p["type"] != "disconnect"));
}

#[tokio::test]
async fn setusergroup_refreshes_target_permissions() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    admin.drain();
    bob.drain();

    admin
        .send(json!({"type": "setusergroup", "userid": bob_account.id, "groupName": "admin"}))
        .await;
    let packets = bob.packets();
    let perms = packets.iter().find(|p| p["type"] == "updatePerms").unwrap();
    assert!(perms["perms"].as_array().unwrap().contains(&json!(permission::REMOVE_ROOM)));

    admin
        .send(json!({"type": "setusergroup", "userid": bob_account.id, "groupName": "nope"}))
        .await;
    let packets = admin.packets();
    assert_eq!(packets.last().unwrap()["message"], "Unknown group");
}

#[tokio::test]
async fn invite_returns_signup_url() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;

    admin.send(json!({"type": "invite"})).await;
    let packets = admin.packets();
    assert_eq!(packets[0]["type"], "invite");
    let url = packets[0]["url"].as_str().unwrap();
    let code = url
        .strip_prefix("https://chat.example.com/invite/?code=")
        .unwrap();
    assert_eq!(
        harness.storage.check_sign_up(code).await.unwrap().as_deref(),
        Some("user")
    );
}

#[tokio::test]
async fn group_lifecycle() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    let (mut bob, bob_account) = harness.login("bob", "user").await;
    admin.drain();

    admin
        .send(json!({"type": "creategroup", "groupName": "mods", "perms": ["suppressUser"]}))
        .await;
    let packets = admin.packets();
    assert_eq!(types(&packets), vec!["updateGroups"]);
    assert!(harness.storage.get_group("mods").await.unwrap().unwrap().has("suppressUser"));

    admin
        .send(json!({"type": "creategroup", "groupName": "mods"}))
        .await;
    assert_eq!(admin.packets()[0]["message"], "Group already exists");

    admin
        .send(json!({"type": "setusergroup", "userid": bob_account.id, "groupName": "mods"}))
        .await;
    bob.drain();
    admin
        .send(json!({"type": "updategroup", "groupName": "mods", "addPerms": ["createRoom"], "removePerms": ["suppressUser"]}))
        .await;
    let packets = bob.packets();
    assert_eq!(packets[0]["type"], "updatePerms");
    assert_eq!(packets[0]["perms"], json!(["createRoom"]));

    admin.drain();
    admin
        .send(json!({"type": "removegroup", "groupName": "mods"}))
        .await;
    assert_eq!(admin.packets()[0]["message"], "Group is still assigned to users");

    admin
        .send(json!({"type": "setusergroup", "userid": bob_account.id, "groupName": "user"}))
        .await;
    admin.drain();
    admin
        .send(json!({"type": "removegroup", "groupName": "mods"}))
        .await;
    assert_eq!(admin.types(), vec!["updateGroups"]);
    assert!(harness.storage.get_group("mods").await.unwrap().is_none());
}

#[tokio::test]
async fn invite_for_removed_group_cannot_sign_up() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    admin
        .send(json!({"type": "creategroup", "groupName": "mods"}))
        .await;
    admin
        .send(json!({"type": "invite", "groupName": "mods"}))
        .await;
    let invite = admin
        .packets()
        .into_iter()
        .find(|p| p["type"] == "invite")
        .unwrap();
    let code = invite["url"]
        .as_str()
        .unwrap()
        .strip_prefix("https://chat.example.com/invite/?code=")
        .unwrap()
        .to_string();
    admin
        .send(json!({"type": "removegroup", "groupName": "mods"}))
        .await;
    assert!(harness.storage.get_group("mods").await.unwrap().is_none());

    let mut client = harness.connect().await;
    client.send(signup("new@b.com", "Newcomer", &code)).await;
    let frames = client.drain();
    assert_eq!(texts(&frames)[0]["message"], "Invalid or expired signup code");
    let email = domain::UserEmail::parse("new@b.com").unwrap();
    assert!(harness
        .storage
        .get_account_by_email(&email)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn infinite_code_for_missing_group_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let server = ChatServer::new(ChatServerDependencies {
        storage: storage.clone(),
        uploads: Arc::new(PrefixUploads),
        password_hasher: Arc::new(PlainHasher),
        settings: ServerSettings {
            infinite_signup_code: Some(INFINITE_CODE.into()),
            infinite_signup_group: "ghosts".into(),
            ..ServerSettings::default()
        },
    });
    server.start(&[]).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = Connection::new(tx);
    protocol::handle_open(&server, &connection).await;
    protocol::handle_frame(
        &server,
        &connection,
        &signup("a@b.com", "Alice", INFINITE_CODE).to_string(),
    )
    .await;

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    let replies = texts(&frames);
    assert_eq!(replies.last().unwrap()["message"], "Invalid or expired signup code");
    assert!(storage.get_all_accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn infinite_signup_group_cannot_be_removed() {
    let harness = Harness::new().await;
    let (mut admin, _) = harness.login("admin", "admin").await;
    admin.drain();

    admin
        .send(json!({"type": "removegroup", "groupName": "user"}))
        .await;
    assert_eq!(
        admin.packets()[0]["message"],
        "Group is the target of the infinite signup code"
    );
    assert!(harness.storage.get_group("user").await.unwrap().is_some());
}

#[tokio::test]
async fn context_option_checks_permission_and_fires_callback() {
    let harness = Harness::new().await;
    harness
        .server
        .context_menu()
        .add(ContextMenuEntry::new("Wave", "wave", None))
        .await;
    harness
        .server
        .context_menu()
        .add(ContextMenuEntry::new("Ban", "ban", Some("banUser")))
        .await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .server
        .events()
        .listen_fn(
            EventChannel::UserContextMenuCallback,
            Priority::Normal,
            move |event| {
                let _ = tx.send(event.data.clone());
            },
        )
        .await
        .unwrap();
    let (mut alice, alice_account) = harness.login("alice", "user").await;
    let target = harness.account("target", "user").await;

    alice
        .send(json!({"type": "contextoption", "option": "ban", "userid": target.id}))
        .await;
    assert_eq!(alice.packets()[0]["message"], "Permission denied \"banUser\"");

    alice
        .send(json!({"type": "contextoption", "option": "wave", "userid": target.id}))
        .await;
    let data = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data["option"], "wave");
    assert_eq!(data["userid"], json!(alice_account.id));
    assert_eq!(data["targetid"], json!(target.id));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_v1_packet_is_fatal() {
    let harness = Harness::new().await;
    let (mut alice, _) = harness.login("alice", "user").await;

    alice.send(json!({"type": "signup"})).await;
    let frames = alice.drain();
    assert_eq!(texts(&frames)[0]["message"], "Unknown packet type");
    assert_eq!(close_of(&frames).map(|(code, _)| code), Some(PROTOCOL_CLOSE_CODE));
}

#[tokio::test]
async fn missing_field_is_rejected_without_closing() {
    let harness = Harness::new().await;
    let (mut alice, _) = harness.login("alice", "user").await;

    alice.send(json!({"type": "joinroom"})).await;
    let frames = alice.drain();
    assert_eq!(texts(&frames)[0]["message"], "Missing \"roomid\"");
    assert_eq!(close_of(&frames), None);
}

// ----- 断开 -----

#[tokio::test]
async fn close_of_authenticated_session_broadcasts_disconnect() {
    let harness = Harness::new().await;
    let voice = harness.storage.create_room("lounge", RoomType::Voice).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;
    let (bob, bob_account) = harness.login("bob", "user").await;
    let mut bob = bob;
    bob.send(json!({"type": "joinroom", "roomid": voice.id})).await;
    alice.drain();

    bob.close().await;
    let packets = alice.packets();
    assert_eq!(
        types(&packets),
        vec!["disconnect", "updateRooms", "updateUsers"]
    );
    assert_eq!(packets[0]["userid"], json!(bob_account.id));
    assert_eq!(packets[1]["roomList"][0]["userlist"], json!([]));
}

#[tokio::test]
async fn close_of_unauthenticated_socket_is_silent() {
    let harness = Harness::new().await;
    let (mut alice, _) = harness.login("alice", "user").await;
    let stranger = harness.connect().await;

    stranger.close().await;
    assert!(alice.packets().is_empty());
}

#[tokio::test]
async fn post_message_broadcasts_synthetic_message() {
    let harness = Harness::new().await;
    let room = harness.storage.create_room("general", RoomType::Text).await.unwrap();
    let (mut alice, _) = harness.login("alice", "user").await;

    let message = harness
        .server
        .post_message(room.id, "CI", "build passed", "webhook")
        .await
        .unwrap();
    assert_eq!(message.userid, None);

    let packets = alice.packets();
    assert_eq!(packets[0]["message"]["type"], "webhook");
    assert_eq!(packets[0]["message"]["username"], "CI");
}

#[tokio::test]
async fn present_custom_window_targets_all_sessions_of_user() {
    let harness = Harness::new().await;
    let (mut first, account) = harness.login("alice", "user").await;
    let mut second = harness.connect().await;
    second
        .send(json!({
            "type": "login",
            "email": account.email.as_str(),
            "password": PASSWORD,
            "protocol": "v1",
        }))
        .await;
    first.drain();
    second.drain();

    let delivered = harness
        .server
        .present_custom_window(account.id, json!({"title": "Hello"}))
        .await;
    assert_eq!(delivered, 2);
    for client in [&mut first, &mut second] {
        assert_eq!(
            client.packets(),
            vec![json!({"type": "customWindow", "window": {"title": "Hello"}})]
        );
    }
}

#[tokio::test]
async fn first_start_creates_admin_signup_code() {
    let harness = Harness::new().await;
    let state = harness.storage.snapshot().await;
    assert_eq!(state.signups.len(), 1);
    assert_eq!(state.signups[0].group, permission::ADMIN_GROUP);
}
