//! JSON lines layer.
//!
//! Every event becomes one line with `timestamp` (RFC 3339), `level`,
//! `service`, `pid`, `target`, `message` and any structured fields.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    timestamp: String,
    level: &'a str,
    service: &'a str,
    pid: u32,
    target: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span: Option<&'a str>,
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Layer writing one JSON object per event to `W`.
pub struct JsonLayer<W> {
    service_name: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service_name: impl Into<String>, make_writer: W) -> Self {
        Self {
            service_name: service_name.into(),
            pid: std::process::id(),
            make_writer,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let span = ctx.event_span(event);
        let line = LogLine {
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            level: metadata.level().as_str(),
            service: &self.service_name,
            pid: self.pid,
            target: metadata.target(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            span: span.as_ref().map(|span| span.name()),
        };

        if let Ok(mut json) = serde_json::to_string(&line) {
            json.push('\n');
            let _ = self.make_writer.make_writer().write_all(json.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppendWriter;
    use tempfile::tempdir;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_event_becomes_json_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let writer = AppendWriter::open(&path).unwrap();

        let subscriber = tracing_subscriber::registry().with(JsonLayer::new("cli", writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(user_id = "u-1", attempts = 2u64, "Login successful");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["service"], "cli");
        assert_eq!(line["message"], "Login successful");
        assert_eq!(line["fields"]["user_id"], "u-1");
        assert_eq!(line["fields"]["attempts"], 2);
        assert_eq!(line["pid"], std::process::id());
    }

    #[test]
    fn test_span_name_is_recorded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let writer = AppendWriter::open(&path).unwrap();

        let subscriber = tracing_subscriber::registry().with(JsonLayer::new("cli", writer));
        tracing::subscriber::with_default(subscriber, || {
            let _guard = tracing::info_span!("refresh").entered();
            tracing::warn!("Token refresh failed");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["span"], "refresh");
        assert_eq!(line["level"], "WARN");
        assert!(line.get("fields").is_none());
    }
}
