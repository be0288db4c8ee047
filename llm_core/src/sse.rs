//! Minimal server-sent-events line decoder for chat completion streams.
//!
//! Network chunks can split a line (or a multi-byte character) anywhere, so
//! bytes are buffered until a full `\n`-terminated line is available.

/// Payload marker the upstream sends after the last delta.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw network chunk and return the `data:` payloads of every
    /// line completed by it. Comments, `event:` lines and blank keep-alive
    /// lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }

    /// Bytes received after the last complete line.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}
