mod backend;
mod batch;
mod certificates;
mod config;
mod context;
mod db;
mod error;
mod gate;
mod ipc;
mod ledger;
mod session;
mod telemetry;
mod workflow;

use std::io::{self, BufRead, Write};
use tracing::{error, info};

fn main() {
    telemetry::init_tracing();
    info!(target: "batchcertd", version = env!("CARGO_PKG_VERSION"), "sidecar started");

    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(target: "batchcertd", error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    info!(target: "batchcertd", "sidecar stopped");
}
