//! Stream emitter: ordered per-thread event delivery with bounded buffering.
//!
//! One emitter feeds one consumer (the HTTP streaming bridge, or nothing for
//! detached jobs). The buffer is bounded; on overflow, droppable events
//! (`token`, `thinking`) are discarded first and counted, while `tool_*`,
//! `interrupt`, `error`, and `done` block the producer until there is room, so
//! they are never lost. The terminal `done` event carries `truncated=true` when
//! any droppable event was discarded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use stream_event::{FinalStatus, ThinkingStep, WireEvent};

/// Default bounded buffer size, in events. Overridden from settings.
pub const DEFAULT_BUFFER_EVENTS: usize = 256;

/// Per-run event emitter. Cheap to clone; all clones share the drop counter.
#[derive(Clone)]
pub struct StreamEmitter {
    tx: Option<mpsc::Sender<WireEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl StreamEmitter {
    /// Creates an emitter with a bounded buffer and returns the consumer half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WireEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// An emitter with no consumer; every emit is a no-op. Used by detached jobs.
    pub fn sink() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Emits one event. Critical events apply back-pressure (await queue room);
    /// droppable events are discarded and counted when the buffer is full.
    pub async fn emit(&self, event: WireEvent) {
        let Some(tx) = &self.tx else { return };
        if event.is_critical() {
            if tx.send(event).await.is_err() {
                tracing::debug!("stream consumer gone, critical event discarded");
            }
        } else if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether any droppable event was discarded on this stream.
    pub fn truncated(&self) -> bool {
        self.dropped.load(Ordering::Relaxed) > 0
    }

    pub async fn token(&self, content: impl Into<String>) {
        self.emit(WireEvent::Token {
            content: content.into(),
        })
        .await;
    }

    pub async fn thinking(&self, step: ThinkingStep, content: impl Into<String>) {
        self.emit(WireEvent::Thinking {
            step,
            content: content.into(),
        })
        .await;
    }

    pub async fn error(&self, code: &str, message: impl Into<String>, recoverable: bool) {
        self.emit(WireEvent::Error {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        })
        .await;
    }

    /// Emits the terminal event, attaching the truncation flag.
    pub async fn done(&self, final_status: FinalStatus) {
        self.emit(WireEvent::Done {
            final_status,
            truncated: self.truncated(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Events arrive at the consumer in emission order.
    #[tokio::test]
    async fn events_ordered() {
        let (emitter, mut rx) = StreamEmitter::channel(8);
        emitter.token("a").await;
        emitter.token("b").await;
        emitter.done(FinalStatus::Completed).await;
        drop(emitter);
        let mut kinds = vec![];
        while let Some(ev) = rx.recv().await {
            kinds.push(ev.to_value().unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["token", "token", "done"]);
    }

    /// **Scenario**: On overflow, tokens are dropped and `done` reports truncated,
    /// while critical events are all delivered.
    #[tokio::test]
    async fn overflow_drops_tokens_not_criticals() {
        let (emitter, mut rx) = StreamEmitter::channel(2);
        // Fill the buffer with tokens, then overflow it.
        for i in 0..5 {
            emitter.token(format!("t{i}")).await;
        }
        assert!(emitter.truncated());

        // Drain in a consumer task so the blocking critical sends can proceed.
        let consumer = tokio::spawn(async move {
            let mut events = vec![];
            while let Some(ev) = rx.recv().await {
                events.push(ev);
            }
            events
        });
        emitter
            .error("transient", "connection reset", true)
            .await;
        emitter.done(FinalStatus::Completed).await;
        drop(emitter);

        let events = consumer.await.unwrap();
        let kinds: Vec<String> = events
            .iter()
            .map(|e| e.to_value().unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        // 2 buffered tokens survived, 3 were dropped; error and done delivered.
        assert_eq!(kinds, vec!["token", "token", "error", "done"]);
        match events.last().unwrap() {
            WireEvent::Done { truncated, .. } => assert!(truncated),
            other => panic!("expected done, got {other:?}"),
        }
    }

    /// **Scenario**: A sink emitter accepts events without a consumer.
    #[tokio::test]
    async fn sink_is_noop() {
        let emitter = StreamEmitter::sink();
        emitter.token("ignored").await;
        emitter.done(FinalStatus::Completed).await;
        assert!(!emitter.truncated());
    }
}
