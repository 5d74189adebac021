//! Line-chat client: type a line, it reaches everyone else on the server.
//!
//! Run the server first:
//! - cargo run -p udpwire --example chat_server
//!
//! Then:
//! - cargo run -p udpwire --example chat_client -- alice 127.0.0.1:9000
//!
//! Type `/exit` to leave. Dropped messages are resent automatically until
//! the server acknowledges them.

use std::{
    collections::HashMap,
    env,
    io::BufRead,
    net::SocketAddr,
    sync::mpsc,
    thread,
    time::Duration,
};

use udpwire::{Client, ConnectionState, PacketStatus};

const APP_ID: u16 = 0xC4A7;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "anon".to_string());
    let server_addr: SocketAddr =
        args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string()).parse()?;

    let mut client = Client::connect(APP_ID, server_addr)?;

    println!("connecting to {}...", server_addr);
    while client.state() == ConnectionState::Connecting {
        thread::sleep(Duration::from_millis(50));
    }
    if client.state() != ConnectionState::Connected {
        println!("connection failed");
        return Ok(());
    }
    println!("connected (send rate {}/s), type to chat", client.send_rate());

    // Stdin is blocking, so lines arrive over a channel from a reader thread.
    let (line_sender, lines) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_sender.send(line).is_err() {
                break;
            }
        }
    });

    let mut unacked: HashMap<u16, String> = HashMap::new();

    while client.state() == ConnectionState::Connected {
        while client.available() > 0 {
            let Ok(payload) = client.receive() else { break };
            println!(
                "< {} [rtt {} ms]",
                String::from_utf8_lossy(&payload),
                client.rtt().as_millis()
            );
        }

        for result in client.get_packet_results() {
            let Some(text) = unacked.get(&result.sequence_number).cloned() else {
                continue;
            };
            match result.status {
                PacketStatus::Successful => {
                    unacked.remove(&result.sequence_number);
                }
                PacketStatus::Dropped => {
                    println!("* resending dropped message: \"{}\"", text);
                    unacked.remove(&result.sequence_number);
                    let seq = client.send(text.clone().into_bytes());
                    unacked.insert(seq, text);
                }
                PacketStatus::Pending => {}
            }
        }
        client.clear_packet_results();

        while let Ok(line) = lines.try_recv() {
            if line == "/exit" {
                client.close();
                return Ok(());
            }
            let text = format!("{}: {}", name, line);
            let seq = client.send(text.clone().into_bytes());
            unacked.insert(seq, text);
        }

        thread::sleep(Duration::from_millis(10));
    }

    println!("connection dropped");
    Ok(())
}
