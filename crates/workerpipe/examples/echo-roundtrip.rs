//! Concurrent requests against the bundled echo worker.
//!
//! ```text
//! cargo build --features cli
//! cargo run --example echo-roundtrip -- target/debug/workerpipe
//! ```

use std::process::Command;
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use workerpipe::transport::{Request, Transport, TransportConfig};

#[derive(Serialize)]
struct CompileRequest {
    compilation_id: u32,
    source: String,
}

impl Request for CompileRequest {
    const KIND: &'static str = "compile_request";
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let binary = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "workerpipe".to_string());

    let mut command = Command::new(binary);
    command.args(["--log-level", "info", "echo", "--batch", "4"]);
    let transport = Arc::new(Transport::spawn_with_config(
        &mut command,
        TransportConfig::default(),
    )?);

    let callers: Vec<_> = (1..=4)
        .map(|id| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                let request = CompileRequest {
                    compilation_id: id,
                    source: format!(".c{id} {{ color: red }}"),
                };
                transport.send(&request, id)
            })
        })
        .collect();

    for caller in callers {
        match caller.join() {
            Ok(Ok(reply)) => println!("{} {}", reply.kind, reply.payload),
            Ok(Err(err)) => eprintln!("request failed: {err}"),
            Err(_) => eprintln!("caller panicked"),
        }
    }

    transport.close();
    Ok(())
}
