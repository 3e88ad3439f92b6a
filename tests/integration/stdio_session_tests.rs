//! Integration tests for the subprocess stdio transport, driven end to end
//! through a real child process (`sh`) acting as a canned NDJSON server.

#![cfg(unix)]

use std::collections::HashMap;
use std::time::Duration;

use mcp_probe::protocol::{Inbound, Message};
use mcp_probe::transport::Target;
use mcp_probe::{AppError, ClientConfig, Session};

/// Build a stdio target that runs the given shell script as the server.
fn shell_target(script: &str) -> Target {
    Target::classify(
        "sh",
        vec!["-c".to_owned(), script.to_owned()],
        HashMap::new(),
    )
}

/// A canned server that answers the first request (the initialize handshake,
/// which is always id 1 on a fresh session) and then waits for the
/// `initialized` notification before exiting.
const INIT_SERVER: &str = concat!(
    "read line; ",
    r#"printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"echo-server","version":"1.0"}}}'; "#,
    "read line2",
);

/// The full open → initialize → close flow against a child process.
#[tokio::test]
async fn initialize_succeeds_against_child_process() {
    let config = ClientConfig::default();
    let handle = shell_target(INIT_SERVER)
        .open(&config)
        .await
        .expect("stdio transport must open");
    let session = Session::connect(handle, &config);

    let negotiated = tokio::time::timeout(Duration::from_secs(5), session.initialize())
        .await
        .expect("handshake must finish in bounded time")
        .expect("handshake must succeed");

    assert_eq!(negotiated.protocol_version, "2024-11-05");
    assert_eq!(
        negotiated.server_info.expect("server info").name,
        "echo-server"
    );
    assert_eq!(session.pending_requests().await, 0);

    session.close().await;
}

/// A nonexistent executable fails at open time with a transport error; no
/// session is ever constructed.
#[tokio::test]
async fn spawn_failure_is_a_transport_error() {
    let config = ClientConfig::default();
    let target = Target::classify(
        "definitely-not-a-real-binary-7c1f",
        Vec::new(),
        HashMap::new(),
    );

    let result = target.open(&config).await;
    match result {
        Err(AppError::Transport(msg)) => assert!(
            msg.contains("definitely-not-a-real-binary-7c1f"),
            "error must name the command, got: {msg}"
        ),
        other => panic!("expected Err(AppError::Transport), got: {other:?}"),
    }
}

/// A malformed line from the server surfaces on the feed as a decode error;
/// the session survives it and still delivers the following notification.
#[tokio::test]
async fn malformed_line_surfaces_without_killing_the_session() {
    let script = concat!(
        r#"printf '%s\n' 'this is not json'; "#,
        r#"printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/progress"}'; "#,
        "read line",
    );

    let config = ClientConfig::default();
    let handle = shell_target(script)
        .open(&config)
        .await
        .expect("stdio transport must open");
    let session = Session::connect(handle, &config);
    let mut feed = session.incoming_messages().await;

    match tokio::time::timeout(Duration::from_secs(5), feed.recv()).await {
        Ok(Some(Inbound::Error(err))) => assert!(
            matches!(err, AppError::Decode(_)),
            "first feed item must be the decode error, got: {err:?}"
        ),
        other => panic!("expected the decode error first, got: {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(5), feed.recv()).await {
        Ok(Some(Inbound::Message(Message::Notification(note)))) => {
            assert_eq!(note.method, "notifications/progress");
        }
        other => panic!("expected the notification second, got: {other:?}"),
    }

    session.close().await;
}

/// A server that exits immediately closes the session: outstanding requests
/// fail with `SessionClosed` rather than hanging.
#[tokio::test]
async fn child_exit_closes_the_session() {
    let config = ClientConfig::default();
    let handle = shell_target("exit 0")
        .open(&config)
        .await
        .expect("stdio transport must open");
    let session = Session::connect(handle, &config);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.send_request("ping", None, None),
    )
    .await
    .expect("request must resolve in bounded time");

    assert!(
        matches!(result, Err(AppError::SessionClosed(_))),
        "request against a dead server must fail with SessionClosed, got: {result:?}"
    );

    session.close().await;
}
