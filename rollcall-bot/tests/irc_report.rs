//! Roll call over a real socket against a scripted IRC server.
//!
//! The server registers the bot, answers every PING barrier, and refuses
//! messages to one nick the way a network does for an absent user.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use rollcall_bot::Error;
use rollcall_bot::coordinator::Coordinator;
use rollcall_bot::filter::Verdict;
use rollcall_bot::roster::{Address, Participant, Roster};
use rollcall_bot::session::Session;
use rollcall_bot::transport::{InboundEvent, IrcTransport, Payload};
use rollcall_sdk::client::{self, ConnectConfig};

/// Serve one client: 001 on USER, PONG for every PING, 401 for PRIVMSGs to
/// `absent`.
async fn scripted_server(listener: TcpListener, absent: &'static str) {
    let Ok((socket, _)) = listener.accept().await else {
        return;
    };
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = if line.starts_with("USER ") {
            Some(":srv 001 rollcall :Welcome".to_string())
        } else if let Some(token) = line.strip_prefix("PING ") {
            Some(format!(":srv PONG srv {token}"))
        } else if line.starts_with(&format!("PRIVMSG {absent} ")) {
            Some(format!(":srv 401 rollcall {absent} :No such nick/channel"))
        } else {
            None
        };
        if let Some(reply) = reply
            && writer.write_all(format!("{reply}\r\n").as_bytes()).await.is_err()
        {
            break;
        }
    }
}

async fn coordinator_against(absent: &'static str) -> Coordinator<IrcTransport> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(scripted_server(listener, absent));

    let config = ConnectConfig {
        server_addr: addr.to_string(),
        ..Default::default()
    };
    let conn = client::establish_connection(&config).await.unwrap();
    let (handle, mut events) = client::connect_with_stream(conn, config);
    // Keep the event stream drained; nothing here reads it.
    tokio::spawn(async move { while events.recv().await.is_some() {} });

    let transport = IrcTransport::new(handle)
        .with_line_delay(Duration::ZERO)
        .with_confirm_timeout(Duration::from_secs(5));
    let alice = Participant::new("Alice", Address::new("1", "srv"));
    let session = Session::new(Roster::new(vec![alice]).unwrap(), Address::new("commander", "srv"));
    Coordinator::new(session, transport)
}

fn reply_from_alice(coordinator: &Coordinator<IrcTransport>) -> InboundEvent {
    InboundEvent {
        sender: Address::new("1", "user.cloak"),
        chat: "1".into(),
        message_id: Some("m1".into()),
        timestamp: coordinator.session().started_at().unwrap() + chrono::Duration::seconds(1),
        payload: Payload::plain("ok"),
    }
}

#[tokio::test]
async fn report_to_absent_recipient_is_fatal() {
    let mut coordinator = coordinator_against("commander").await;
    coordinator.start().await.unwrap();

    let reply = reply_from_alice(&coordinator);
    let err = coordinator.dispatch(&reply).await.unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::Report { reason, .. }) => assert!(reason.contains("401"), "{reason}"),
        _ => panic!("unexpected error: {err:#}"),
    }
    assert!(!coordinator.session().is_complete());
}

#[tokio::test]
async fn prompt_to_absent_participant_is_fatal() {
    let mut coordinator = coordinator_against("1").await;
    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, Error::Prompt { ref name, .. } if name == "Alice"), "{err}");
    assert!(coordinator.session().started_at().is_none());
}

#[tokio::test]
async fn accepted_report_completes_the_roll_call() {
    let mut coordinator = coordinator_against("nobody").await;
    coordinator.start().await.unwrap();

    let reply = reply_from_alice(&coordinator);
    let verdict = coordinator.dispatch(&reply).await.unwrap();
    assert_eq!(verdict, Verdict::Complete);
    assert!(coordinator.session().is_complete());
}
