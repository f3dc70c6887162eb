//! `logs`: print or follow the gateway log file.

use std::io::{BufRead, BufReader, Seek, SeekFrom};

pub fn run(follow: bool, tail: usize, level: Option<&str>) -> i32 {
    let Some(path) = super::log_file() else {
        eprintln!("no cache directory available on this platform");
        return 1;
    };
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(_) => {
            eprintln!("no log file at {}", path.display());
            return 1;
        }
    };

    let mut reader = BufReader::new(file);
    let mut lines: Vec<String> = Vec::new();
    let mut buffer = String::new();
    loop {
        buffer.clear();
        match reader.read_line(&mut buffer) {
            Ok(0) => break,
            Ok(_) => lines.push(buffer.trim_end().to_string()),
            Err(_) => break,
        }
    }

    let start = lines.len().saturating_sub(tail);
    for line in &lines[start..] {
        if level_matches(line, level) {
            println!("{}", line);
        }
    }

    if !follow {
        return 0;
    }

    // Follow mode: poll for appended content.
    let mut position = reader
        .seek(SeekFrom::Current(0))
        .unwrap_or(0);
    loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
        let Ok(file) = std::fs::File::open(&path) else {
            continue;
        };
        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::Start(position)).is_err() {
            continue;
        }
        let mut buffer = String::new();
        while let Ok(read) = reader.read_line(&mut buffer) {
            if read == 0 {
                break;
            }
            let line = buffer.trim_end();
            if level_matches(line, level) {
                println!("{}", line);
            }
            position += read as u64;
            buffer.clear();
        }
    }
}

/// Level filter: show the requested level and anything more severe.
fn level_matches(line: &str, level: Option<&str>) -> bool {
    let Some(level) = level else {
        return true;
    };
    let ordered = ["debug", "info", "warn", "error"];
    let threshold = ordered.iter().position(|l| *l == level).unwrap_or(0);
    ordered[threshold..]
        .iter()
        .any(|l| line.contains(&l.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::level_matches;

    #[test]
    fn test_level_filtering() {
        let warn_line = "2026-08-02T10:00:00Z  WARN gateway: slow request";
        let debug_line = "2026-08-02T10:00:00Z DEBUG gateway: wire dump";

        assert!(level_matches(warn_line, None));
        assert!(level_matches(warn_line, Some("info")));
        assert!(level_matches(warn_line, Some("warn")));
        assert!(!level_matches(debug_line, Some("info")));
        assert!(level_matches(debug_line, Some("debug")));
    }
}
