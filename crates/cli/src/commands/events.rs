//! `contextrelay events listen`: Follow `/events/relay` and print each event.

use futures::StreamExt;
use serde_json::Value;

/// One dispatched server-sent event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental parser for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: SseMessage,
    has_data: bool,
}

impl SseParser {
    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseMessage> {
        self.buffer.push_str(chunk);
        let mut done = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.has_data {
                    let mut msg = std::mem::take(&mut self.current);
                    if msg.event.is_empty() {
                        msg.event = "message".into();
                    }
                    done.push(msg);
                }
                self.current = SseMessage::default();
                self.has_data = false;
                continue;
            }
            // Comment lines carry keep-alives.
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.current.event = value.to_string(),
                "id" => self.current.id = Some(value.to_string()),
                "data" => {
                    if self.has_data {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                    self.has_data = true;
                }
                _ => {}
            }
        }

        done
    }
}

pub async fn listen(
    base_url: &str,
    types: Option<&str>,
    client_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/events/relay", base_url.trim_end_matches('/'));
    let mut query = Vec::new();
    if let Some(types) = types {
        query.push(("event_types", types));
    }
    if let Some(client_id) = client_id {
        query.push(("client_id", client_id));
    }

    println!("Connecting to SSE stream at {url}...");
    let response = reqwest::Client::new()
        .get(&url)
        .query(&query)
        .header("accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| format!("Error connecting to SSE stream: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(format!("SSE stream rejected ({status}): {text}").into());
    }

    let mut parser = SseParser::default();
    let mut stream = std::pin::pin!(response.bytes_stream());
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            chunk = stream.next() => {
                let Some(chunk) = chunk else { break };
                let chunk = chunk?;
                for msg in parser.push(&String::from_utf8_lossy(&chunk)) {
                    print_message(&msg);
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    println!("\nDisconnected from SSE stream.");
    Ok(())
}

fn print_message(msg: &SseMessage) {
    println!("---");
    println!("EVENT: {}", msg.event);
    if let Some(id) = &msg.id {
        println!("ID:    {id}");
    }
    println!("DATA:");
    match serde_json::from_str::<Value>(&msg.data) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| msg.data.clone())
        ),
        Err(_) => println!("{}", msg.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push("event: context_updated\nid: 4").is_empty());

        let msgs = parser.push("2\ndata: {\"a\":1}\n\n: keep-alive\n\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event, "context_updated");
        assert_eq!(msgs[0].id.as_deref(), Some("42"));
        assert_eq!(msgs[0].data, "{\"a\":1}");
    }

    #[test]
    fn multi_line_data_and_default_event_name() {
        let mut parser = SseParser::default();
        let msgs = parser.push("data: one\r\ndata: two\r\n\r\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event, "message");
        assert_eq!(msgs[0].data, "one\ntwo");
    }
}
