//! Wire protocol for Olav conversation streams.
//!
//! One stream is a sequence of discrete JSON events with a `type` discriminator,
//! delivered as newline-delimited JSON. The event shapes here are the documented
//! contract between the server and every client; the envelope (`thread_id`, `seq`)
//! is injected into each line separately so event payloads stay transport-neutral.

mod envelope;
mod event;

pub use envelope::{to_ndjson_line, Envelope, StreamEnvelope};
pub use event::{
    DecisionKind, ExecutionPlan, FinalStatus, RiskLevel, ThinkingStep, WireEvent,
};
