// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Prints subscription messages and listings as text or JSON lines.

use dockwire::api::ContainerSummary;
use dockwire::client::{Channel, Chunk, Message, Payload};
use serde::Serialize;
use std::io::Write;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output
    Normal,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Print a one-line result.
    pub fn line(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => println!("{message}"),
            OutputMode::Json => print_json(&JsonEvent {
                event: "result",
                message,
            }),
        }
    }

    /// Print one message from a subscription.
    pub fn message(&self, message: &Message) {
        match (&message.payload, self.mode) {
            (Payload::Json(value), _) => println!("{value}"),
            (Payload::Chunk(chunk), _) => self.chunk(chunk),
            (Payload::End(_), OutputMode::Normal) => {}
            (Payload::End(reason), OutputMode::Json) => print_json(&JsonEvent {
                event: "end",
                message: &reason.to_string(),
            }),
        }
    }

    /// Print container output on the matching local stream.
    pub fn chunk(&self, chunk: &Chunk) {
        match self.mode {
            OutputMode::Normal => {
                // Broken pipes are not worth failing a stream over.
                let _ = match chunk.channel {
                    Channel::Stderr => std::io::stderr().write_all(&chunk.bytes),
                    Channel::Stdout | Channel::Stdin => std::io::stdout().write_all(&chunk.bytes),
                };
            }
            OutputMode::Json => print_json(&JsonChunk {
                channel: chunk.channel.to_string(),
                data: String::from_utf8_lossy(&chunk.bytes).into_owned(),
            }),
        }
    }

    pub fn containers(&self, containers: &[ContainerSummary]) {
        match self.mode {
            OutputMode::Normal => {
                println!("{:<12}  {:<24}  {:<24}  STATUS", "ID", "NAME", "IMAGE");
                for c in containers {
                    println!(
                        "{:<12}  {:<24}  {:<24}  {}",
                        c.id.short(),
                        c.name(),
                        c.image,
                        c.status
                    );
                }
            }
            OutputMode::Json => {
                for c in containers {
                    print_json(&JsonContainer {
                        id: c.id.as_str(),
                        name: c.name(),
                        image: &c.image,
                        state: &c.state,
                        status: &c.status,
                    });
                }
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => eprintln!("Error: {message}"),
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(&JsonEvent {
                    event: "error",
                    message,
                }) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct JsonChunk {
    channel: String,
    data: String,
}

#[derive(Serialize)]
struct JsonContainer<'a> {
    id: &'a str,
    name: &'a str,
    image: &'a str,
    state: &'a str,
    status: &'a str,
}
