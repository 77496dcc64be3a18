pub mod ndjson;
pub mod sse;

pub use ndjson::{NdjsonDecodeError, NdjsonDecoder};
pub use sse::{SseDecodeError, SseDecoder, SseEvent, SseRecord};
