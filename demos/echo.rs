//! Echo round-trip - one poll group driving both ends.
//!
//! This example demonstrates:
//! - Serving on an ephemeral port and connecting to it
//! - Tagging poll-group members with their own endpoint handles
//! - Draining the acceptable/readable sets after each wait
//!
//! Run with `RUST_LOG=debug` to watch the endpoint state transitions.

use std::time::{Duration, Instant};

use msglink::{Endpoint, Message, PollGroup};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = Endpoint::serve("127.0.0.1:0")?;
    let addr = server.local_addr()?;
    println!("listening on {addr}");

    let client = Endpoint::connect(addr)?;
    client.send(Message::from_buffer(&b"ping"[..]));

    let mut group: PollGroup<Endpoint> = PollGroup::new();
    group.add(&server, server.clone())?;
    group.add(&client, client.clone())?;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if group.wait(deadline)? == 0 {
            return Err("timed out waiting for the echo".into());
        }

        // New connections join the group and echo whatever arrives.
        while let Some(listener) = group.acceptable().cloned() {
            if let Some(child) = listener.accept() {
                println!("accepted connection");
                group.add(&child, child.clone())?;
            }
        }

        while let Some(endpoint) = group.readable().cloned() {
            let Some(msg) = endpoint.recv() else { continue };
            let payload = msg.into_buffer().expect("buffer message");

            if endpoint.id() == client.id() {
                // The echo made it back; we are done.
                println!("client got {:?}", String::from_utf8_lossy(&payload));
                return Ok(());
            }
            println!("server got {:?}, echoing", String::from_utf8_lossy(&payload));
            endpoint.send(Message::from_buffer(payload));
        }

        if let Some(endpoint) = group.errored() {
            return Err(format!("endpoint died: errno {}", endpoint.geterror()).into());
        }
    }
}
