//! Mock test runner binary for integration testing
//!
//! Implements a minimal engine-side version of the runner wire protocol
//! so the coordinator can be exercised without a real test-execution
//! engine. Module specs are injected via repeated `--spec project:path`
//! arguments; a module whose path contains `slow` blocks its run until a
//! `cancel` request arrives, and one containing `fail` fails its test.

use regex::Regex;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};

fn main() {
    let specs = parse_specs();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState {
        specs,
        project: "storybook".to_string(),
        pattern: None,
    };

    while let Some(message) = read_frame(&mut reader) {
        if !state.dispatch(&mut reader, &mut writer, &message) {
            break;
        }
    }
}

/// Collect `--spec [project:]path` pairs from the command line
fn parse_specs() -> Vec<(Option<String>, String)> {
    let mut specs = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--spec" {
            if let Some(value) = args.next() {
                match value.split_once(':') {
                    Some((project, path)) => {
                        specs.push((Some(project.to_string()), path.to_string()))
                    }
                    None => specs.push((None, value)),
                }
            }
        }
    }
    specs
}

fn read_frame<R: BufRead>(reader: &mut R) -> Option<Value> {
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).unwrap_or(0) == 0 {
            return None; // EOF
        }

        if !header_line.starts_with("Content-Length:") {
            continue;
        }

        let content_length: usize = header_line
            .trim_start_matches("Content-Length:")
            .trim()
            .parse()
            .unwrap_or(0);

        // Blank separator line
        let mut blank = String::new();
        reader.read_line(&mut blank).ok();

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            return None;
        }

        match serde_json::from_slice(&body) {
            Ok(value) => return Some(value),
            Err(_) => continue,
        }
    }
}

fn send_frame<W: Write>(writer: &mut W, message: &Value) {
    let body = serde_json::to_string(message).unwrap();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

fn send_ok<W: Write>(writer: &mut W, request_seq: u64, body: Value) {
    send_frame(
        writer,
        &json!({
            "type": "response",
            "requestSeq": request_seq,
            "success": true,
            "body": body,
        }),
    );
}

fn send_error<W: Write>(writer: &mut W, request_seq: u64, message: &str) {
    send_frame(
        writer,
        &json!({
            "type": "response",
            "requestSeq": request_seq,
            "success": false,
            "message": message,
        }),
    );
}

fn send_event<W: Write>(writer: &mut W, event: &str, body: Value) {
    send_frame(
        writer,
        &json!({
            "type": "event",
            "event": event,
            "body": body,
        }),
    );
}

struct MockState {
    specs: Vec<(Option<String>, String)>,
    project: String,
    pattern: Option<Regex>,
}

impl MockState {
    /// Handle one request; returns false on shutdown
    fn dispatch<R: BufRead, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        message: &Value,
    ) -> bool {
        if message.get("type").and_then(Value::as_str) != Some("request") {
            return true;
        }

        let seq = message.get("seq").and_then(Value::as_u64).unwrap_or(0);
        let command = message.get("command").and_then(Value::as_str).unwrap_or("");
        let arguments = message.get("arguments").cloned().unwrap_or(Value::Null);

        match command {
            "configure" => {
                if let Some(project) = arguments.get("project").and_then(Value::as_str) {
                    self.project = project.to_string();
                }
                send_ok(writer, seq, json!({}));
            }
            "globTestSpecs" => {
                let specs: Vec<Value> = self
                    .specs
                    .iter()
                    .map(|(project, path)| {
                        let project = project.as_deref().unwrap_or(&self.project);
                        json!({ "project": project, "moduleId": path })
                    })
                    .collect();
                send_ok(writer, seq, json!({ "specs": specs }));
            }
            "setNamePattern" => match arguments.get("pattern") {
                Some(Value::String(pattern)) => match Regex::new(pattern) {
                    Ok(re) => {
                        self.pattern = Some(re);
                        send_ok(writer, seq, json!({}));
                    }
                    Err(e) => send_error(writer, seq, &format!("invalid pattern: {}", e)),
                },
                _ => {
                    self.pattern = None;
                    send_ok(writer, seq, json!({}));
                }
            },
            "setWatchMode" | "invalidate" | "cancel" => {
                send_ok(writer, seq, json!({}));
            }
            "runFiles" => {
                self.run_files(reader, writer, seq, &arguments);
            }
            "shutdown" => {
                send_ok(writer, seq, json!({}));
                return false;
            }
            other => send_error(writer, seq, &format!("unknown command: {}", other)),
        }

        true
    }

    fn run_files<R: BufRead, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        seq: u64,
        arguments: &Value,
    ) {
        let specs: Vec<String> = arguments
            .get("specs")
            .and_then(Value::as_array)
            .map(|specs| {
                specs
                    .iter()
                    .filter_map(|s| s.get("moduleId").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let total = specs.len();

        send_event(writer, "runStarted", json!({ "total": total }));

        // A "slow" module blocks until the client cancels
        if specs.iter().any(|path| path.contains("slow")) {
            loop {
                let message = match read_frame(reader) {
                    Some(message) => message,
                    None => return,
                };
                let inner_seq = message.get("seq").and_then(Value::as_u64).unwrap_or(0);
                let command = message.get("command").and_then(Value::as_str).unwrap_or("");
                send_ok(writer, inner_seq, json!({}));
                if command == "cancel" {
                    break;
                }
            }

            let outcome = json!({
                "status": "cancelled",
                "passed": 0,
                "failed": 0,
                "skipped": total,
            });
            send_event(writer, "runFinished", outcome.clone());
            send_ok(writer, seq, outcome);
            return;
        }

        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for path in &specs {
            let name = test_name(path);
            let selected = self
                .pattern
                .as_ref()
                .map(|re| re.is_match(&name))
                .unwrap_or(true);

            if !selected {
                skipped += 1;
            } else if path.contains("fail") {
                failed += 1;
            } else {
                passed += 1;
            }

            send_event(
                writer,
                "testProgress",
                json!({
                    "passed": passed,
                    "failed": failed,
                    "skipped": skipped,
                    "total": total,
                }),
            );
        }

        let status = if failed > 0 { "failed" } else { "passed" };
        let outcome = json!({
            "status": status,
            "passed": passed,
            "failed": failed,
            "skipped": skipped,
        });
        send_event(writer, "runFinished", outcome.clone());
        send_ok(writer, seq, outcome);
    }
}

/// One mock test per module, named after the file stem
fn test_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.split('.').next().unwrap_or(file).to_string()
}
