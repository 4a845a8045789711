use crate::fanout::{in_sink_send, INTERNAL_TARGET, ORIGIN};
use crate::logger::Logger;
use crate::record::{LogRecord, Source};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns every `tracing` event into a
/// [`LogRecord`] and hands it to a fan-out [`Logger`].
///
/// Level filtering is left to the logger's base handler. Events are
/// dropped, and never reach the logger, when they:
///
/// - use this crate's internal target,
/// - are emitted from inside a sink's `send`,
/// - come from the HTTP stack sinks send through (`hyper`, `h2`,
///   `reqwest`, `rustls`, `want`), whose connection tasks run outside
///   the send itself.
///
/// Any of these would otherwise produce records whose delivery emits
/// more of them. `Layer::enabled` keeps its default so other layers on
/// the same subscriber still see these events.
pub struct FanoutLayer {
    logger: Logger,
}

impl FanoutLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl<S> Layer<S> for FanoutLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target() == INTERNAL_TARGET
            || in_sink_send()
            || is_transport_target(meta.target())
            || !self.logger.enabled(*meta.level())
        {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: *meta.level(),
            target: meta.target().to_string(),
            message: message.unwrap_or_default(),
            source: Source {
                function: meta.module_path().map(|s| s.to_string()),
                file: meta.file().map(|s| s.to_string()),
                line: meta.line(),
            },
            fields,
        };

        if let Err(e) = self.logger.log_record(&record) {
            eprintln!("{ORIGIN}: failed to write log record: {e}");
        }
    }
}

/// Crates below the sinks' HTTP client.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "h2", "reqwest", "rustls", "want"];

fn is_transport_target(target: &str) -> bool {
    TRANSPORT_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// Collects event fields into a JSON map; the `message` field becomes the
/// record message.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
