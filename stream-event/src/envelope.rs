//! Envelope (thread_id, seq) injected into each wire line.
//!
//! `StreamEnvelope` tracks the per-stream sequence number and stamps each event;
//! `seq` is monotonically increasing within one stream so a client that attaches
//! mid-thread can order and de-duplicate lines.

use serde_json::Value;

use crate::event::WireEvent;

/// Envelope fields stamped on every wire line.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Thread this stream belongs to; constant within a stream.
    pub thread_id: Option<String>,
    /// Per-line sequence number; monotonically increasing within a stream.
    pub seq: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.thread_id {
            obj.entry("thread_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(seq) = self.seq {
            obj.entry("seq")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Envelope state for one stream: thread id plus the next sequence number.
pub struct StreamEnvelope {
    pub thread_id: String,
    next_seq: u64,
}

impl StreamEnvelope {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            next_seq: 1,
        }
    }

    /// Stamps the envelope on the event value and advances the sequence.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_thread_id(&self.thread_id)
            .with_seq(self.next_seq);
        self.next_seq += 1;
        env.inject_into(value);
    }
}

/// Converts a wire event to one NDJSON line (JSON + trailing newline), stamping
/// the envelope from the given stream state.
pub fn to_ndjson_line(
    event: &WireEvent,
    state: &mut StreamEnvelope,
) -> Result<String, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    let mut line = serde_json::to_string(&value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FinalStatus, WireEvent};

    /// **Scenario**: Envelope stamps thread_id and seq without overwriting payload keys.
    #[test]
    fn envelope_inject() {
        let mut obj = serde_json::json!({"type": "token", "content": "x"});
        Envelope::new()
            .with_thread_id("cli-1")
            .with_seq(7)
            .inject_into(&mut obj);
        assert_eq!(obj["thread_id"], "cli-1");
        assert_eq!(obj["seq"], 7);
        assert_eq!(obj["type"], "token");
    }

    /// **Scenario**: Sequence numbers increase by one per line within a stream.
    #[test]
    fn seq_monotone_within_stream() {
        let mut state = StreamEnvelope::new("cli-1");
        let l1 = to_ndjson_line(&WireEvent::Token { content: "a".into() }, &mut state).unwrap();
        let l2 = to_ndjson_line(
            &WireEvent::Done {
                final_status: FinalStatus::Completed,
                truncated: false,
            },
            &mut state,
        )
        .unwrap();
        let v1: serde_json::Value = serde_json::from_str(l1.trim()).unwrap();
        let v2: serde_json::Value = serde_json::from_str(l2.trim()).unwrap();
        assert_eq!(v1["seq"], 1);
        assert_eq!(v2["seq"], 2);
        assert!(l1.ends_with('\n') && l2.ends_with('\n'));
    }
}
