use bytes::{Bytes, BytesMut};

use crate::jsonrpc::Frame;

/// Upper bound on a single SSE record; records past this are dropped and the
/// decoder resynchronizes at the next blank line.
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: Option<String>,
    pub comment_only: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SseDecodeError {
    #[error("SSE record exceeded {0} bytes")]
    RecordTooLarge(usize),
}

/// Frame-level interpretation of a decoded SSE record.
#[derive(Debug, Clone)]
pub enum SseEvent {
    Endpoint(String),
    Message(Frame),
    Heartbeat,
    /// An event name we don't assign meaning to; forwarded to logs only.
    Other { event: Option<String>, data: String },
    ParseError(String),
}

pub fn classify(record: SseRecord) -> SseEvent {
    if record.comment_only && record.event.is_none() && record.data.is_none() {
        return SseEvent::Heartbeat;
    }
    match record.event.as_deref() {
        Some("endpoint") => SseEvent::Endpoint(record.data.unwrap_or_default()),
        Some("message") | None => {
            let data = record.data.unwrap_or_default();
            if data.is_empty() {
                SseEvent::Heartbeat
            } else {
                match serde_json::from_str::<Frame>(&data) {
                    Ok(frame) => SseEvent::Message(frame),
                    Err(e) => SseEvent::ParseError(e.to_string()),
                }
            }
        }
        Some(other) => SseEvent::Other {
            event: Some(other.to_string()),
            data: record.data.unwrap_or_default(),
        },
    }
}

/// Encodes a single JSON-RPC frame as an SSE `message` event.
pub fn encode_message(frame: &Frame) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(frame)?;
    Ok(Bytes::from(format!("event: message\ndata: {json}\n\n")))
}

/// Encodes the endpoint-advertisement record a frontend sends once, right
/// after opening an SSE stream, naming the path clients should POST to.
pub fn encode_endpoint(path: &str) -> Bytes {
    Bytes::from(format!("event: endpoint\ndata: {path}\n\n"))
}

/// A comment-only record. Used as a heartbeat because comment lines are
/// invisible to any SSE parser's event/data accumulation.
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(b":ping\n\n")
}

/// Incrementally decodes an SSE byte stream into records, tolerating chunk
/// boundaries that land anywhere — mid-line, mid-field, or mid-record — by
/// keeping unconsumed bytes in an internal carry buffer until a full record
/// (terminated by a blank line) is available.
pub struct SseDecoder {
    buf: BytesMut,
    max_record_bytes: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_record_bytes(MAX_RECORD_BYTES)
    }

    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self { buf: BytesMut::new(), max_record_bytes }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SseRecord, SseDecodeError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let boundary = find_blank_line(&self.buf);
            let Some((record_end, consumed)) = boundary else {
                if self.buf.len() > self.max_record_bytes {
                    out.push(Err(SseDecodeError::RecordTooLarge(self.max_record_bytes)));
                    self.buf.clear();
                }
                break;
            };

            let record_bytes = self.buf.split_to(record_end);
            let _ = self.buf.split_to(consumed - record_end);

            if record_bytes.len() > self.max_record_bytes {
                out.push(Err(SseDecodeError::RecordTooLarge(self.max_record_bytes)));
                continue;
            }

            if let Some(record) = parse_record(&record_bytes) {
                out.push(Ok(record));
            }
        }

        out
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the first blank-line record terminator (`\n\n` or `\r\n\r\n`),
/// returning (record byte length, total bytes including the separator).
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, i + 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, i + 4));
        }
        i += 1;
    }
    None
}

fn parse_record(raw: &[u8]) -> Option<SseRecord> {
    let text = String::from_utf8_lossy(raw);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    let mut had_comment = false;
    let mut saw_any_line = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        saw_any_line = true;
        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest;
            had_comment = true;
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // Other field names (id:, retry:) carry no meaning for this bridge.
    }

    if !saw_any_line {
        return None;
    }

    let data = if data_lines.is_empty() { None } else { Some(data_lines.join("\n")) };
    Some(SseRecord { event, data, comment_only: had_comment && event.is_none() && data.is_none() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_message_record() {
        let mut d = SseDecoder::new();
        let out = d.feed(b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n");
        assert_eq!(out.len(), 1);
        let rec = out.into_iter().next().unwrap().unwrap();
        match classify(rec) {
            SseEvent::Message(f) => assert_eq!(f.method.as_deref(), Some("ping")),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn chunk_boundary_inside_record_is_not_lost() {
        let mut d = SseDecoder::new();
        let whole = b"event: endpoint\ndata: /messages/abc\n\n".to_vec();
        let (a, b) = whole.split_at(10);
        let mut out = d.feed(a);
        assert!(out.is_empty());
        out.extend(d.feed(b));
        assert_eq!(out.len(), 1);
        let rec = out.into_iter().next().unwrap().unwrap();
        match classify(rec) {
            SseEvent::Endpoint(path) => assert_eq!(path, "/messages/abc"),
            other => panic!("expected Endpoint, got {other:?}"),
        }
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut d = SseDecoder::new();
        let out = d.feed(b"event: message\ndata: line one\ndata: line two\n\n");
        let rec = out.into_iter().next().unwrap().unwrap();
        assert_eq!(rec.data.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn comment_only_record_is_heartbeat() {
        let mut d = SseDecoder::new();
        let out = d.feed(b":ping\n\n");
        let rec = out.into_iter().next().unwrap().unwrap();
        assert!(matches!(classify(rec), SseEvent::Heartbeat));
    }

    #[test]
    fn two_records_in_one_chunk_both_decode() {
        let mut d = SseDecoder::new();
        let out = d.feed(b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n\n");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn oversized_record_reports_error_and_resyncs() {
        let mut d = SseDecoder::with_max_record_bytes(16);
        let mut out = d.feed(b"event: message\ndata: this is far too long for the cap\n\n");
        out.extend(d.feed(b"event: message\ndata: ok\n\n"));
        assert!(out.iter().any(|r| r.is_err()));
        let last = out.into_iter().last().unwrap().unwrap();
        assert_eq!(last.data.as_deref(), Some("ok"));
    }
}
