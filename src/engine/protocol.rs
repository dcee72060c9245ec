use serde_json::Value;

/// One decoded event from the engine's stream-json output.
///
/// The engine is free to grow new event shapes; anything unrecognized decodes
/// to `Unknown` and consumers treat it as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SessionStart,
    ToolUse { name: String },
    Text,
    Result {
        text: String,
        subtype: Option<String>,
    },
    Unknown,
}

/// Reassembles newline-delimited JSON records from arbitrary byte chunks.
///
/// The OS pipe hands us chunks at whatever boundary it pleases, so a single
/// JSON object routinely arrives split across several reads. Lines that fail
/// to parse are dropped; the stream keeps going.
#[derive(Debug, Default)]
pub struct StreamParser {
    buf: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, get back every complete JSON record it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(value) = parse_line(&line[..line.len() - 1]) {
                records.push(value);
            }
        }
        records
    }

    /// Flush the trailing unterminated line at stream end.
    pub fn finish(&mut self) -> Option<Value> {
        let tail = std::mem::take(&mut self.buf);
        parse_line(&tail)
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

/// The engine stamps its resumable session id on every event it emits.
pub fn session_id(value: &Value) -> Option<&str> {
    value.get("session_id").and_then(|v| v.as_str())
}

/// Classify one decoded record. An assistant message can carry several
/// content blocks, so one line may yield several events.
pub fn decode_line(value: &Value) -> Vec<EngineEvent> {
    let event_type = match value.get("type").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return vec![EngineEvent::Unknown],
    };

    match event_type {
        "system" => vec![EngineEvent::SessionStart],
        "assistant" => {
            let content = match value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            {
                Some(c) => c,
                None => return vec![EngineEvent::Unknown],
            };

            let mut events = Vec::new();
            for block in content {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("?")
                            .to_string();
                        events.push(EngineEvent::ToolUse { name });
                    }
                    Some("text") => events.push(EngineEvent::Text),
                    _ => {}
                }
            }
            events
        }
        "result" => {
            let text = value
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let subtype = value
                .get("subtype")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            vec![EngineEvent::Result { text, subtype }]
        }
        _ => vec![EngineEvent::Unknown],
    }
}
