//! Stream relay writer (C4).
//!
//! Wraps the outbound byte stream to the client with a line-buffered side
//! channel that feeds the usage parser, without ever delaying or
//! reshaping what the client receives. Bytes reach the client exactly as
//! they arrived from upstream; the side channel only ever lags behind by
//! at most one incomplete trailing line.

use crate::config::Platform;
use crate::pricing::UsageSnapshot;

/// Splits newly-arrived `chunk` off of `buffer` into complete `\n`-delimited
/// lines, trimming a trailing `\r`. Any partial trailing data stays in
/// `buffer` for the next call.
pub fn drain_lines(buffer: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    if !chunk.is_empty() {
        buffer.extend_from_slice(chunk);
    }

    let mut lines = Vec::new();
    loop {
        let Some(pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

fn sse_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Accumulates token usage observed in a streamed response as chunks
/// arrive. The client-facing bytes themselves are written by the caller
/// (e.g. directly into an axum `Body` channel) — this type only tracks the
/// side channel and never buffers data meant for the client.
pub struct UsageTee {
    platform: Platform,
    buffer: Vec<u8>,
    usage: UsageSnapshot,
}

impl UsageTee {
    pub fn new(platform: Platform) -> Self {
        UsageTee {
            platform,
            buffer: Vec::new(),
            usage: UsageSnapshot::default(),
        }
    }

    /// Observes one chunk already forwarded to the client. Must be called
    /// with chunks in delivery order; never mutates or delays them.
    pub fn observe(&mut self, chunk: &[u8]) {
        for line in drain_lines(&mut self.buffer, chunk) {
            self.feed_line(&line);
        }
    }

    /// Flushes the residual buffered bytes as a final line on end-of-body,
    /// even without a terminating newline.
    pub fn finish(mut self) -> UsageSnapshot {
        if !self.buffer.is_empty() {
            let residual = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&residual).into_owned();
            self.feed_line(&line);
        }
        self.usage
    }

    fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim();
        let Some(payload) = sse_payload(trimmed) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }
        crate::usage::accumulate_json(self.platform, payload, &mut self.usage);
    }
}
