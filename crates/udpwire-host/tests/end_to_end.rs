//! End-to-end tests over real loopback UDP sockets.

use std::{
    net::UdpSocket,
    thread,
    time::{Duration, Instant},
};

use udpwire_core::config::Config;
use udpwire_host::{Client, Listener};
use udpwire_peer::{ConnectionState, PacketStatus};
use udpwire_protocol::{Bitfield, Packet, PacketType};

const APP_ID: u16 = 0xBEEF;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn fast_config() -> Config {
    Config { send_rate: 50, ..Config::default() }
}

#[test]
fn handshake_data_exchange_and_delivery_results() {
    let mut listener = Listener::bind_with_config(APP_ID, "127.0.0.1:0", fast_config()).unwrap();
    listener.start().unwrap();
    let server_addr = listener.local_addr();

    let client = Client::connect_with_config(APP_ID, server_addr, fast_config()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || listener.pending()), "request never queued");
    let server_side = listener.accept_client().expect("pending request to accept");
    assert_eq!(server_side.state(), ConnectionState::Connected);
    assert!(!listener.pending(), "queue should be drained");

    assert!(
        wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Connected),
        "client never connected, state {:?}",
        client.state()
    );
    assert_eq!(client.send_rate(), 50, "negotiated rate should match the listener's");

    client.send(b"ping".to_vec());
    assert!(wait_until(Duration::from_secs(2), || server_side.available() > 0));
    assert_eq!(server_side.receive().unwrap(), b"ping".to_vec());

    server_side.send(b"pong".to_vec());
    assert!(wait_until(Duration::from_secs(2), || client.available() > 0));
    assert_eq!(client.receive().unwrap(), b"pong".to_vec());

    // The ack stream confirms delivery without any extra round trips.
    assert!(wait_until(Duration::from_secs(2), || {
        client
            .get_packet_results()
            .iter()
            .any(|result| result.status == PacketStatus::Successful)
    }));

    listener.stop();
}

#[test]
fn listener_multiplexes_two_clients() {
    let mut listener = Listener::bind_with_config(APP_ID, "127.0.0.1:0", fast_config()).unwrap();
    listener.start().unwrap();
    let server_addr = listener.local_addr();

    let client_a = Client::connect_with_config(APP_ID, server_addr, fast_config()).unwrap();
    let client_b = Client::connect_with_config(APP_ID, server_addr, fast_config()).unwrap();

    let mut server_sides = Vec::new();
    assert!(wait_until(Duration::from_secs(2), || {
        while let Some(connection) = listener.accept_client() {
            server_sides.push(connection);
        }
        server_sides.len() == 2
    }));

    assert!(wait_until(Duration::from_secs(2), || {
        client_a.state() == ConnectionState::Connected
            && client_b.state() == ConnectionState::Connected
    }));

    client_a.send(b"from-a".to_vec());
    client_b.send(b"from-b".to_vec());

    // Each payload must surface on the connection owning that endpoint.
    assert!(wait_until(Duration::from_secs(2), || {
        server_sides.iter().all(|connection| connection.available() > 0)
    }));

    for connection in &server_sides {
        let payload = connection.receive().unwrap();
        // Echo it back over the same connection.
        connection.send(payload);
    }

    assert!(wait_until(Duration::from_secs(2), || {
        client_a.available() > 0 && client_b.available() > 0
    }));
    assert_eq!(client_a.receive().unwrap(), b"from-a".to_vec());
    assert_eq!(client_b.receive().unwrap(), b"from-b".to_vec());

    listener.stop();
}

#[test]
fn mismatched_app_id_never_connects() {
    let mut listener = Listener::bind_with_config(APP_ID, "127.0.0.1:0", fast_config()).unwrap();
    listener.start().unwrap();

    let client = Client::connect_with_config(0x0BAD, listener.local_addr(), fast_config()).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Disconnected),
        "client should end disconnected, state {:?}",
        client.state()
    );
    assert!(!listener.pending(), "mismatched request must not be queued");

    listener.stop();
}

#[test]
fn duplicate_connection_request_is_refused() {
    let mut listener = Listener::bind_with_config(APP_ID, "127.0.0.1:0", fast_config()).unwrap();
    listener.start().unwrap();
    let server_addr = listener.local_addr();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let request =
        Packet::control(APP_ID, 0, 0, Bitfield::new(4), PacketType::ConnectionRequest).serialize();
    raw.send_to(&request, server_addr).unwrap();
    raw.send_to(&request, server_addr).unwrap();

    // The first request queues; the duplicate draws a refusal.
    let mut buffer = [0u8; 128];
    let (len, from) = raw.recv_from(&mut buffer).unwrap();
    assert_eq!(from, server_addr);
    let refuse = Packet::deserialize(&buffer[..len]).unwrap();
    assert_eq!(refuse.packet_type(), PacketType::ConnectionRefuse);

    assert!(listener.pending(), "original request should still be queued");

    listener.stop();
}

#[test]
fn handshake_times_out_against_a_silent_peer() {
    // Bound but never replies.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let started = Instant::now();
    let client = Client::connect(APP_ID, silent_addr).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Disconnected),
        "client should give up, state {:?}",
        client.state()
    );
    assert!(
        started.elapsed() >= Duration::from_millis(400),
        "gave up before the handshake timeout could elapse"
    );
}

#[test]
fn stopping_the_listener_notifies_connected_peers() {
    let mut listener = Listener::bind_with_config(APP_ID, "127.0.0.1:0", fast_config()).unwrap();
    listener.start().unwrap();

    let client = Client::connect_with_config(APP_ID, listener.local_addr(), fast_config()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || listener.pending()));
    let server_side = listener.accept_client().unwrap();
    assert!(wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Connected));

    listener.stop();

    // The farewell notify flips the client to Disconnected.
    assert!(
        wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Disconnected),
        "client never saw the disconnection notify, state {:?}",
        client.state()
    );
    assert!(server_side.state().is_terminal());
}
