//! `status`: read the serve process's status snapshot.
//!
//! The snapshot is best-effort and non-authoritative; a missing file just
//! means no gateway has run recently on this machine.

use serde_json::Value;

pub fn run(json: bool, server: Option<&str>, pending: bool) -> i32 {
    let Some(path) = super::status_file() else {
        eprintln!("no cache directory available on this platform");
        return 1;
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            eprintln!(
                "no status snapshot at {} (is the gateway running?)",
                path.display()
            );
            return 1;
        }
    };
    let status: Value = match serde_json::from_str(&content) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("unreadable status snapshot: {}", e);
            return 1;
        }
    };

    let servers: Vec<&Value> = status["servers"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter(|s| server.map(|name| s["name"] == name).unwrap_or(true))
                .collect()
        })
        .unwrap_or_default();

    if server.is_some() && servers.is_empty() {
        eprintln!("server '{}' not found in snapshot", server.unwrap_or(""));
        return 1;
    }

    if json {
        let filtered = serde_json::json!({
            "pid": status["pid"],
            "written_at": status["written_at"],
            "revision_id": status["revision_id"],
            "servers": servers,
        });
        println!("{}", serde_json::to_string_pretty(&filtered).unwrap_or_default());
        return 0;
    }

    println!(
        "gateway pid {} (snapshot {})",
        status["pid"], status["written_at"]
    );
    println!("catalog revision {}", status["revision_id"]);
    for entry in servers {
        let name = entry["name"].as_str().unwrap_or("?");
        let state = entry["state"].as_str().unwrap_or("?");
        let tools = entry["tool_count"].as_u64().unwrap_or(0);
        print!("  {:<20} {:<10} {:>3} tools", name, state, tools);
        if pending {
            print!(
                "  {} pending",
                entry["pending_requests"].as_u64().unwrap_or(0)
            );
        }
        if let Some(error) = entry["last_error"].as_str() {
            print!("  ({})", error);
        }
        println!();
    }
    0
}
