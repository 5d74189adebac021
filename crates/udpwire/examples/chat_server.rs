//! Line-chat server: every message a client sends is relayed to the others.
//!
//! Run:
//! - cargo run -p udpwire --example chat_server
//! - cargo run -p udpwire --example chat_server -- 127.0.0.1:7777
//!
//! Messages are tracked per client; anything reported dropped is resent
//! until the client acknowledges it.

use std::{
    collections::HashMap,
    env,
    net::SocketAddr,
    thread,
    time::Duration,
};

use udpwire::{Config, Connection, ConnectionState, Listener, PacketStatus};

const APP_ID: u16 = 0xC4A7;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()?;

    let mut config = Config::default();
    config.send_rate = 20;

    let mut listener = Listener::bind_with_config(APP_ID, bind_addr, config)?;
    listener.start()?;
    println!("chat server listening on {}", listener.local_addr());

    let mut clients: Vec<Connection> = Vec::new();
    // Messages sent to each client that have not been acknowledged yet.
    let mut unacked: HashMap<SocketAddr, HashMap<u16, String>> = HashMap::new();
    let mut outbox: Vec<(String, Vec<Connection>)> = Vec::new();

    loop {
        while listener.pending() {
            if let Some(client) = listener.accept_client() {
                println!("[join] {}", client.remote_endpoint());
                outbox.push((
                    format!("* {} joined", client.remote_endpoint()),
                    clients.clone(),
                ));
                unacked.insert(client.remote_endpoint(), HashMap::new());
                clients.push(client);
            }
        }

        // Drop clients whose connection ended.
        for client in clients.iter().filter(|c| c.state() != ConnectionState::Connected) {
            println!("[leave] {}", client.remote_endpoint());
            unacked.remove(&client.remote_endpoint());
        }
        clients.retain(|client| client.state() == ConnectionState::Connected);

        // Check delivery of previously relayed messages.
        for client in &clients {
            let pending = match unacked.get_mut(&client.remote_endpoint()) {
                Some(pending) => pending,
                None => continue,
            };
            for result in client.get_packet_results() {
                let Some(text) = pending.get(&result.sequence_number).cloned() else {
                    continue;
                };
                match result.status {
                    PacketStatus::Successful => {
                        pending.remove(&result.sequence_number);
                    }
                    PacketStatus::Dropped => {
                        println!(
                            "[resend] {} seq {}: \"{}\"",
                            client.remote_endpoint(),
                            result.sequence_number,
                            text
                        );
                        pending.remove(&result.sequence_number);
                        let seq = client.send(text.clone().into_bytes());
                        pending.insert(seq, text);
                    }
                    PacketStatus::Pending => {}
                }
            }
            client.clear_packet_results();
        }

        // Collect inbound messages and queue them for everyone else.
        for client in &clients {
            while client.available() > 0 {
                let Ok(payload) = client.receive() else { break };
                let text = String::from_utf8_lossy(&payload).to_string();
                println!("[msg] {}: \"{}\"", client.remote_endpoint(), text);
                let targets = clients
                    .iter()
                    .filter(|other| other.remote_endpoint() != client.remote_endpoint())
                    .cloned()
                    .collect();
                outbox.push((text, targets));
            }
        }

        // Relay queued messages.
        for (text, targets) in outbox.drain(..) {
            for target in targets {
                let seq = target.send(text.clone().into_bytes());
                if let Some(pending) = unacked.get_mut(&target.remote_endpoint()) {
                    pending.insert(seq, text.clone());
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
