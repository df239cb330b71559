//! Line splitting for server-sent event streams.

/// Buffers raw bytes and yields complete SSE lines.
#[derive(Debug, Default)]
pub(crate) struct SseLines {
    buffer: String,
}

impl SseLines {
    /// Feed bytes; returns every line completed by them, without the
    /// trailing `\r\n`. Blank lines and `:` comments are dropped.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            lines.push(line);
        }
        lines
    }
}

/// The payload of a `data:` line, if this is one.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
