//! Incremental decoder for OpenAI-compatible server-sent event streams.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text from `choices[0].delta.content`.
    Delta(String),
    /// `data: [DONE]`
    Done,
}

/// Buffers raw bytes and yields events once each frame's terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    frame_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                let lines = std::mem::take(&mut self.frame_lines);
                events.extend(process_frame(&lines));
            } else {
                self.frame_lines.push(line.to_string());
            }
        }
        events
    }

    /// Flushes a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                self.frame_lines.push(line.to_string());
            }
        }
        let lines = std::mem::take(&mut self.frame_lines);
        process_frame(&lines)
    }
}

fn process_frame(lines: &[String]) -> Vec<SseEvent> {
    let data_lines: Vec<&str> = lines
        .iter()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return Vec::new();
    }
    let data = data_lines.join("\n");
    if data.trim() == "[DONE]" {
        return vec![SseEvent::Done];
    }

    let Ok(value) = serde_json::from_str::<Value>(&data) else {
        return Vec::new();
    };
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|delta| !delta.is_empty())
        .map(|delta| vec![SseEvent::Delta(delta.to_string())])
        .unwrap_or_default()
}
