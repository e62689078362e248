//! Custom tracing layer for JSONL output.
//!
//! Produces one [`LogEvent`] per line on stderr while stdout stays reserved
//! for command payloads.

use std::io::{self, Write};
use std::sync::Mutex;

use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::{Level, LogEvent};

/// Correlation fields carried by spans.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    host_id: Option<String>,
    stage: Option<String>,
    schedule_id: Option<String>,
    entity: Option<String>,
}

impl SpanContext {
    fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "run_id" => &mut self.run_id,
            "host_id" => &mut self.host_id,
            "stage" => &mut self.stage,
            "schedule_id" => &mut self.schedule_id,
            "entity" => &mut self.entity,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    fn fill_from(&mut self, other: &SpanContext) {
        if self.run_id.is_none() {
            self.run_id.clone_from(&other.run_id);
        }
        if self.host_id.is_none() {
            self.host_id.clone_from(&other.host_id);
        }
        if self.stage.is_none() {
            self.stage.clone_from(&other.stage);
        }
        if self.schedule_id.is_none() {
            self.schedule_id.clone_from(&other.schedule_id);
        }
        if self.entity.is_none() {
            self.entity.clone_from(&other.entity);
        }
    }
}

/// Extracts event fields, routing correlation ids into [`SpanContext`].
struct JsonFieldVisitor {
    context: SpanContext,
    fields: serde_json::Map<String, serde_json::Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            context: SpanContext::default(),
            fields: serde_json::Map::new(),
            message: None,
        }
    }

    fn insert_string(&mut self, name: &str, value: String) {
        if name == "message" {
            self.message = Some(value);
        } else if !self.context.set(name, value.clone()) {
            self.fields
                .insert(name.to_string(), serde_json::Value::String(value));
        }
    }
}

impl tracing::field::Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert_string(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.insert_string(field.name(), format!("{:?}", value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Create a layer with a custom writer.
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = JsonFieldVisitor::new();
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        // Event fields win; spans fill in what the event left out, innermost first.
        let mut context = visitor.context;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    context.fill_from(span_ctx);
                }
            }
        }

        let level: Level = (*event.metadata().level()).into();
        let mut out = LogEvent::new(
            level,
            event.metadata().target(),
            visitor.message.unwrap_or_default(),
        );
        out.run_id = context.run_id;
        out.host_id = context.host_id;
        out.stage = context.stage.and_then(|s| s.parse().ok());
        out.schedule_id = context.schedule_id;
        out.entity = context.entity;
        out.fields = visitor.fields.into_iter().collect();

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", out.to_jsonl());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<F: FnOnce()>(f: F) -> Vec<serde_json::Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);

        let output = buffer.lock().unwrap();
        String::from_utf8_lossy(&output)
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect()
    }

    #[test]
    fn test_jsonl_layer_output() {
        let lines = capture(|| {
            tracing::info!(target: "test.event", message = "test message");
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["event"], "test.event");
        assert_eq!(lines[0]["message"], "test message");
        assert!(lines[0]["ts"].is_string());
    }

    #[test]
    fn test_correlation_fields_are_promoted() {
        let lines = capture(|| {
            tracing::warn!(
                target: "warn.failed",
                run_id = "run-1",
                stage = "warn",
                schedule_id = "rs-1",
                entity = "patient:9",
                attempts = 2u64,
                message = "dispatcher down"
            );
        });
        let line = &lines[0];
        assert_eq!(line["run_id"], "run-1");
        assert_eq!(line["stage"], "warn");
        assert_eq!(line["schedule_id"], "rs-1");
        assert_eq!(line["entity"], "patient:9");
        assert_eq!(line["fields"]["attempts"], 2);
        assert!(line["fields"].get("run_id").is_none());
    }

    #[test]
    fn test_span_context_fills_missing_fields() {
        let lines = capture(|| {
            let span = tracing::info_span!("run", run_id = "run-7", host_id = "host-a");
            let _guard = span.enter();
            tracing::info!(target: "audit.written", stage = "audit", message = "entry appended");
        });
        assert_eq!(lines[0]["run_id"], "run-7");
        assert_eq!(lines[0]["host_id"], "host-a");
        assert_eq!(lines[0]["stage"], "audit");
    }

    #[test]
    fn test_unknown_stage_is_dropped() {
        let lines = capture(|| {
            tracing::error!(target: "x", stage = "bogus", message = "fail");
        });
        assert_eq!(lines[0]["level"], "error");
        assert!(lines[0].get("stage").is_none());
    }

    #[test]
    fn test_extra_fields() {
        let lines = capture(|| {
            tracing::info!(target: "test.fields", count = 42, active = true, message = "hi");
        });
        assert_eq!(lines[0]["fields"]["count"], 42);
        assert_eq!(lines[0]["fields"]["active"], true);
    }
}
