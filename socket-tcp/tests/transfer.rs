//! Integration tests for data transfer and teardown.
//!
//! Every test establishes a real loopback connection.  The connector side is
//! wrapped in a [`Simulator`] so the test can count what went over the wire
//! and inject loss or corruption at exact points of the exchange.  Sender and
//! receiver run concurrently with `tokio::join!`.

use std::net::SocketAddr;
use std::time::Duration;

use socket_tcp::{
    error::Phase,
    framing::{recv_framed, send_framed},
    header::Header,
    listener::Ephemeral,
    simulator::{Direction, Fault, Simulator, SimulatorConfig, SimulatorHandle},
    state::ConnectionState,
    Config, ConnError, Connection, Listener, Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn quick() -> Config {
    Config::default()
        .with_timeout(Duration::from_millis(50))
        .with_max_timeout(Duration::from_millis(200))
        .with_max_retries(4)
}

/// Establish a connection; returns `(client, client_handle, server)`.
async fn establish(config: Config) -> (Connection<Simulator>, SimulatorHandle, Connection) {
    let listener = Listener::bind_with(loopback(), config, Ephemeral)
        .await
        .expect("bind listener");
    let listen_addr = listener.local_addr();
    let server_task = tokio::spawn(async move { listener.accept().await });

    let sim = Simulator::transparent(Socket::bind(loopback()).await.expect("bind client"));
    let handle = sim.handle();
    let client = Connection::connect(sim, listen_addr, config)
        .await
        .expect("connect");
    let (server, _) = server_task
        .await
        .expect("accept task panicked")
        .expect("accept");
    (client, handle, server)
}

/// Data segments the client put on the wire, including retransmissions.
fn data_sent(handle: &SimulatorHandle) -> Vec<Header> {
    handle.trace().sent.into_iter().filter(Header::is_data).collect()
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// A short message travels as a length unit plus one chunk, each acked once.
#[tokio::test]
async fn single_chunk_message() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();

    let (sent, received) = tokio::join!(client.send("hello"), server.recv(64));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"hello");

    assert_eq!(data_sent(&handle), vec![Header::data(start), Header::data(start + 1)]);
    let delivered = handle.trace().delivered;
    assert!(delivered.contains(&Header::ack(start + 1)));
    assert!(delivered.contains(&Header::ack(start + 6)));

    assert_eq!(client.seq(), start + 1 + 5);
    assert_eq!(server.seq(), client.seq());
    assert_eq!(server.pending_bytes(), 0);
}

/// Multi-byte characters are never split and `seq` counts encoded bytes.
#[tokio::test]
async fn multi_chunk_unicode_message() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    let message = format!("{}end", "αβγ".repeat(50));
    assert_eq!(message.len(), 303);

    let (sent, received) = tokio::join!(client.send(&message), server.recv(1024));
    sent.expect("send");
    let received = String::from_utf8(received.expect("recv")).expect("utf-8");
    assert_eq!(received, message);

    // "303", four full 64-byte chunks and a 47-byte tail.
    assert_eq!(data_sent(&handle).len(), 1 + 5);
    assert_eq!(client.seq(), start + 3 + 303);
    assert_eq!(server.seq(), client.seq());
}

/// Small buffers drain the message across calls without losing bytes.
#[tokio::test]
async fn recv_resumes_across_calls() {
    let config = quick().with_chunk_size(4);
    let (mut client, _handle, mut server) = establish(config).await;

    let reader = async {
        let mut parts = Vec::new();
        let mut total = 0;
        while total < 10 {
            let part = server.recv(3).await?;
            total += part.len();
            parts.push(String::from_utf8(part).expect("utf-8"));
        }
        Ok::<_, ConnError>(parts)
    };
    let (sent, parts) = tokio::join!(client.send("abcdefghij"), reader);
    sent.expect("send");

    assert_eq!(parts.expect("recv"), vec!["abc", "def", "ghi", "j"]);
    assert_eq!(server.pending_bytes(), 0);
    assert_eq!(server.buffered_bytes(), 0);
}

/// Bytes past the cap are held back for the next call, even after the
/// whole message is off the wire.
#[tokio::test]
async fn recv_holds_back_overflow() {
    let (mut client, _handle, mut server) = establish(quick()).await;

    let (sent, first) = tokio::join!(client.send("abcdefghij"), server.recv(4));
    sent.expect("send");
    assert_eq!(first.expect("recv"), b"abcd");
    assert_eq!(server.pending_bytes(), 0);
    assert_eq!(server.buffered_bytes(), 6);

    assert_eq!(server.recv(4).await.unwrap(), b"efgh");
    assert_eq!(server.recv(4).await.unwrap(), b"ij");
    assert_eq!(server.buffered_bytes(), 0);
    assert_eq!(server.seq(), client.seq());
}

/// An empty message is only its length unit and does not stall the next.
#[tokio::test]
async fn empty_message() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();

    let (sent, received) = tokio::join!(client.send(""), server.recv(16));
    sent.expect("send");
    assert!(received.expect("recv").is_empty());
    assert!(!server.is_closed());
    assert_eq!(data_sent(&handle), vec![Header::data(start)]);
    assert_eq!(server.seq(), start + 1);

    let (sent, received) = tokio::join!(client.send("next"), server.recv(16));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"next");
}

/// Both directions share one sequence counter.
#[tokio::test]
async fn ping_pong() {
    let (mut client, _handle, mut server) = establish(quick()).await;

    let (sent, received) = tokio::join!(client.send("ping"), server.recv(64));
    sent.expect("client send");
    assert_eq!(received.expect("server recv"), b"ping");

    let (sent, received) = tokio::join!(server.send("pong"), client.recv(64));
    sent.expect("server send");
    assert_eq!(received.expect("client recv"), b"pong");

    assert_eq!(client.seq(), server.seq());
}

/// A receiver with nothing to receive gives up after its budget.
#[tokio::test]
async fn idle_recv_times_out() {
    let config = quick().with_max_retries(1);
    let (_client, _handle, mut server) = establish(config).await;

    let err = server.recv(16).await.unwrap_err();
    assert!(
        matches!(err, ConnError::Timeout { phase: Phase::Transfer, attempts: 2 }),
        "got {err:?}"
    );
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// A lost ACK of the length unit causes exactly one retransmission, which
/// the receiver answers with a duplicate ACK.
#[tokio::test]
async fn dropped_ack_is_recovered_by_duplicate_ack() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    handle.drop_once(Direction::Inbound, move |h| *h == Header::ack(start + 1));

    let (sent, received) = tokio::join!(client.send("hello"), server.recv(64));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"hello");

    assert_eq!(handle.sent_count(&Header::data(start)), 2);
    assert_eq!(handle.sent_count(&Header::data(start + 1)), 1);
    assert_eq!(handle.trace().dropped, 1);
    assert_eq!(server.seq(), client.seq());
}

/// A lost ACK of the last chunk is re-acknowledged by the receiver's next
/// `recv`, which then sees the close.
#[tokio::test]
async fn dropped_last_ack_before_close() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    handle.drop_once(Direction::Inbound, move |h| *h == Header::ack(start + 6));

    let writer = async {
        client.send("hello").await?;
        client.close().await
    };
    let reader = async {
        let message = server.recv(64).await?;
        let rest = server.recv(64).await?;
        Ok::<_, ConnError>((message, rest))
    };
    let (closed, received) = tokio::join!(writer, reader);
    closed.expect("send and close");
    let (message, rest) = received.expect("recv");

    assert_eq!(message, b"hello");
    assert!(rest.is_empty());
    assert!(server.is_closed());
    assert_eq!(handle.sent_count(&Header::data(start + 1)), 2);
}

/// A reply sent right after a message whose last ACK was lost still goes
/// through: the replier re-acknowledges the resent unit while it sends.
#[tokio::test]
async fn dropped_last_ack_before_reply() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    // "ping" travels as DATA(start) = "4" and DATA(start + 1) = "ping".
    handle.drop_once(Direction::Inbound, move |h| *h == Header::ack(start + 5));

    let requester = async {
        client.send("ping").await?;
        client.recv(64).await
    };
    let responder = async {
        let request = server.recv(64).await?;
        server.send("pong").await?;
        Ok::<_, ConnError>(request)
    };
    let (reply, request) = tokio::join!(requester, responder);

    assert_eq!(request.expect("server side"), b"ping");
    assert_eq!(reply.expect("client side"), b"pong");
    assert!(handle.sent_count(&Header::data(start + 1)) >= 2);
    assert_eq!(handle.trace().dropped, 1);
    assert_eq!(client.seq(), server.seq());
}

/// A corrupted ACK is a mismatch and triggers one immediate retransmission.
#[tokio::test]
async fn corrupted_ack_triggers_one_retransmission() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    handle.corrupt_once(Direction::Inbound, move |h| *h == Header::ack(start + 1));

    let (sent, received) = tokio::join!(client.send("hello"), server.recv(64));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"hello");

    assert_eq!(handle.sent_count(&Header::data(start)), 2);
    assert_eq!(handle.trace().corrupted, 1);
}

/// A corrupted data unit is discarded and recovered by retransmission.
#[tokio::test]
async fn corrupted_data_is_discarded() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    handle.corrupt_once(Direction::Outbound, move |h| *h == Header::data(start + 1));

    let (sent, received) = tokio::join!(client.send("hello"), server.recv(64));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"hello");
    assert_eq!(handle.sent_count(&Header::data(start + 1)), 2);
}

/// A unit that is never acknowledged exhausts the retry budget.
#[tokio::test]
async fn unacknowledged_unit_exhausts_retries() {
    let config = Config::default()
        .with_timeout(Duration::from_millis(20))
        .with_max_retries(2);
    let (mut client, handle, _server) = establish(config).await;
    let start = client.seq();

    let err = client.send("lost").await.unwrap_err();
    assert!(
        matches!(err, ConnError::RetriesExhausted { seq, attempts: 3 } if seq == start),
        "got {err:?}"
    );
    assert_eq!(handle.sent_count(&Header::data(start)), 3);
    assert_eq!(client.seq(), start);
}

/// Seeded random loss in both directions still delivers the message intact.
#[tokio::test]
async fn random_loss_delivers_intact() {
    let config = Config::default()
        .with_timeout(Duration::from_millis(20))
        .with_max_timeout(Duration::from_millis(80))
        .with_max_retries(12);
    let (mut client, handle, mut server) = establish(config).await;
    handle.reconfigure(SimulatorConfig { loss_rate: 0.2, corrupt_rate: 0.0, seed: 42 });

    let message: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let writer = async {
        client.send(&message).await?;
        client.close().await
    };
    let reader = async {
        let mut bytes = Vec::new();
        while bytes.len() < message.len() {
            bytes.extend(server.recv(128).await?);
        }
        let rest = server.recv(128).await?;
        Ok::<_, ConnError>((bytes, rest))
    };
    let (closed, received) = tokio::join!(writer, reader);
    closed.expect("send and close");
    let (bytes, rest) = received.expect("recv");

    assert_eq!(bytes, message.as_bytes());
    assert!(rest.is_empty());
    assert!(client.is_closed());
    assert!(server.is_closed());
}

/// Loss rules can target any number of matching segments.
#[tokio::test]
async fn repeated_loss_within_budget() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let start = client.seq();
    handle.inject(Direction::Outbound, Fault::Drop, 3, move |h| *h == Header::data(start));

    let (sent, received) = tokio::join!(client.send("x"), server.recv(8));
    sent.expect("send");
    assert_eq!(received.expect("recv"), b"x");
    assert_eq!(handle.sent_count(&Header::data(start)), 4);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Active close on one side is seen as an empty `recv` on the other, and
/// both sides end closed.
#[tokio::test]
async fn close_is_observed_by_peer_recv() {
    let (mut client, handle, mut server) = establish(quick()).await;
    let seq = client.seq();

    let (closed, received) = tokio::join!(client.close(), server.recv(8));
    closed.expect("close");
    assert!(received.expect("recv").is_empty());

    assert!(client.is_closed());
    assert!(server.is_closed());
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.state(), ConnectionState::Closed);

    let trace = handle.trace();
    assert!(trace.sent.contains(&Header::fin(seq)));
    assert!(trace.delivered.contains(&Header::fin_ack(seq + 1)));
    assert!(trace.sent.contains(&Header::ack(seq + 2)));
}

/// Nothing but another close is allowed on a closed connection.
#[tokio::test]
async fn operations_after_close_fail() {
    let (mut client, _handle, mut server) = establish(quick()).await;
    let (closed, _) = tokio::join!(client.close(), server.recv(8));
    closed.expect("close");

    assert!(matches!(client.send("late").await, Err(ConnError::BadState(ConnectionState::Closed))));
    assert!(matches!(client.recv(8).await, Err(ConnError::BadState(ConnectionState::Closed))));
    assert!(matches!(server.send("late").await, Err(ConnError::BadState(_))));
    client.close().await.expect("second close is a no-op");
    server.close().await.expect("close after passive close is a no-op");
}

/// A lost FIN+ACK is repeated, by the passive side's own timer or in
/// answer to the closer's retransmitted FIN.
#[tokio::test]
async fn lost_fin_ack_is_recovered() {
    let (mut client, handle, mut server) = establish(quick()).await;
    handle.drop_once(Direction::Inbound, |h| h.fin && h.ack);

    let (closed, received) = tokio::join!(client.close(), server.recv(8));
    closed.expect("close");
    assert!(received.expect("recv").is_empty());
    assert_eq!(handle.trace().dropped, 1);
    assert!(client.is_closed());
    assert!(server.is_closed());
}

/// If the final ACK of a close never arrives, the passive side still
/// finishes closed.
#[tokio::test]
async fn lost_final_close_ack_force_closes() {
    let config = Config::default()
        .with_timeout(Duration::from_millis(20))
        .with_max_timeout(Duration::from_millis(40))
        .with_max_retries(2);
    let (mut client, handle, mut server) = establish(config).await;
    let seq = client.seq();
    handle.drop_once(Direction::Outbound, move |h| *h == Header::ack(seq + 2));

    let (closed, received) = tokio::join!(client.close(), server.recv(8));
    closed.expect("close");
    assert!(received.expect("passive close").is_empty());
    assert!(server.is_closed());
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Framed text comes back whole, whatever the read size.
#[tokio::test]
async fn framed_round_trip() {
    let (mut client, _handle, mut server) = establish(quick()).await;
    let text = "line one\nline two\n".repeat(10);

    let (sent, received) = tokio::join!(send_framed(&mut client, &text), recv_framed(&mut server, 7));
    sent.expect("send");
    assert_eq!(received.expect("recv").as_deref(), Some(text.as_str()));

    let (closed, received) = tokio::join!(client.close(), recv_framed(&mut server, 7));
    closed.expect("close");
    assert_eq!(received.expect("recv"), None);
}
