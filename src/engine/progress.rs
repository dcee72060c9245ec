use super::protocol::EngineEvent;

/// Project a decoded event onto the coarse progress line shown in the
/// dashboard while a job is in flight. Events that say nothing about
/// progress return `None` and the last known line stays up.
pub fn project(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::ToolUse { name } => Some(tool_progress(name)),
        EngineEvent::Text => Some("Generating a reply...".to_string()),
        EngineEvent::SessionStart | EngineEvent::Result { .. } | EngineEvent::Unknown => None,
    }
}

fn tool_progress(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.contains("bash") || lower.contains("command") {
        "Running a command...".to_string()
    } else if lower.contains("read") || lower.contains("file") {
        "Reading a file...".to_string()
    } else if lower.contains("search") || lower.contains("grep") || lower.contains("glob") {
        "Searching...".to_string()
    } else if lower.contains("web") || lower.contains("fetch") {
        "Fetching data...".to_string()
    } else {
        format!("Using tool {name}...")
    }
}
