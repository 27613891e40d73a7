//! Event sink system for reporting what the scheduler did.
//!
//! Action failures and rule compilations are reported here, in addition to
//! the `tracing` log, so that the surrounding agent can forward them to its
//! own diagnostics channel.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

#[cfg(test)]
pub use sink::MockEventSink;

use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the process-wide event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-wide event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the process-wide event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        set_event_sink(sink.clone());

        get_event_sink().emit("test.event", Some(serde_json::json!({"key": "value"})));
        assert_eq!(sink.events_of_type("test.").len(), 1);

        clear_event_sink();
        get_event_sink().emit("after.clear", None);
        assert_eq!(sink.len(), 1);
    }
}
