//! Incremental decoding of `text/event-stream` bodies.
//!
//! Both the A2A client and the model adapter read SSE over reqwest byte
//! streams, and the transport may cut an event anywhere, including mid-line.
//! The decoder accumulates raw bytes and, per fed chunk, hands back the
//! `data:` payloads of every event that chunk completed. OpenAI-style
//! `[DONE]` sentinels are dropped at this layer so callers only ever see
//! decodable payloads.

const EVENT_DELIMITER: &[u8] = b"\n\n";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub(crate) struct EventStreamDecoder {
    pending: Vec<u8>,
}

impl EventStreamDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns the data payloads of all events the
    /// chunk completed, oldest first. Incomplete trailing bytes stay pending.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(end) = delimiter_position(&self.pending) {
            let event: Vec<u8> = self
                .pending
                .drain(..end + EVENT_DELIMITER.len())
                .collect();
            collect_data_payloads(&String::from_utf8_lossy(&event), &mut payloads);
        }

        payloads
    }
}

fn delimiter_position(pending: &[u8]) -> Option<usize> {
    pending
        .windows(EVENT_DELIMITER.len())
        .position(|window| window == EVENT_DELIMITER)
}

/// Pull the payload out of every `data:` field of one event. Field names
/// other than `data` (`event:`, `id:`, `retry:`, comments) carry nothing the
/// callers care about.
fn collect_data_payloads(event: &str, payloads: &mut Vec<String>) {
    for line in event.lines() {
        let Some(raw) = line.strip_prefix("data:") else {
            continue;
        };
        // A single space after the colon is part of the field syntax.
        let payload = raw.strip_prefix(' ').unwrap_or(raw);
        if payload != DONE_SENTINEL {
            payloads.push(payload.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_split_across_chunks_is_reassembled() {
        let mut decoder = EventStreamDecoder::new();

        assert!(decoder.feed(b"data: {\"par").is_empty());
        assert_eq!(decoder.feed(b"tial\":1}\n\n"), vec!["{\"partial\":1}"]);
    }

    #[test]
    fn one_chunk_may_complete_several_events() {
        let mut decoder = EventStreamDecoder::new();

        let payloads = decoder.feed(b"data: one\n\ndata: two\n\ndata: thr");
        assert_eq!(payloads, vec!["one", "two"]);
        assert_eq!(decoder.feed(b"ee\n\n"), vec!["three"]);
    }

    #[test]
    fn non_data_fields_are_ignored() {
        let mut decoder = EventStreamDecoder::new();

        let payloads = decoder.feed(b"event: message\nid: 7\nretry: 5\ndata: kept\n\n");
        assert_eq!(payloads, vec!["kept"]);
    }

    #[test]
    fn multiple_data_lines_in_one_event_all_surface() {
        let mut decoder = EventStreamDecoder::new();

        let payloads = decoder.feed(b"data: first\ndata: second\n\n");
        assert_eq!(payloads, vec!["first", "second"]);
    }

    #[test]
    fn done_sentinel_is_swallowed() {
        let mut decoder = EventStreamDecoder::new();

        let payloads = decoder.feed(b"data: payload\n\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["payload"]);
    }

    #[test]
    fn missing_space_after_colon_is_tolerated() {
        let mut decoder = EventStreamDecoder::new();

        assert_eq!(decoder.feed(b"data:tight\n\n"), vec!["tight"]);
    }
}
