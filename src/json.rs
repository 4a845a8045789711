use crate::handler::{HandleError, Handler, Scope};
use crate::record::{LogRecord, Source};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Options for [`JsonHandler`].
#[derive(Clone, Debug)]
pub struct JsonOptions {
    /// Least severe level that is still written.
    pub min_level: Level,
    /// Include the call site as a `source` object.
    pub add_source: bool,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            add_source: true,
        }
    }
}

/// Base handler writing one JSON object per line.
///
/// Line layout: `time`, `level`, `source` (optional), `msg`, then the
/// scoped fields. A field named like one of the leading keys is written
/// as a second key of that name.
#[derive(Clone)]
pub struct JsonHandler {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    options: JsonOptions,
    scope: Scope,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    time: String,
    level: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a Source>,
    msg: &'a str,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl JsonHandler {
    pub fn new<W>(writer: W, options: JsonOptions) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::from_boxed(Box::new(writer), options)
    }

    pub fn from_boxed(writer: Box<dyn Write + Send>, options: JsonOptions) -> Self {
        JsonHandler {
            writer: Arc::new(Mutex::new(writer)),
            options,
            scope: Scope::default(),
        }
    }

    pub fn stdout(options: JsonOptions) -> Self {
        Self::new(io::stdout(), options)
    }

    fn encode(&self, record: &LogRecord) -> Result<Vec<u8>, serde_json::Error> {
        let source = if self.options.add_source && !record.source.is_empty() {
            Some(&record.source)
        } else {
            None
        };
        let line = JsonLine {
            time: record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            level: record.level.as_str(),
            source,
            msg: &record.message,
            fields: self.scope.resolve(&record.fields),
        };
        let mut buf = serde_json::to_vec(&line)?;
        buf.push(b'\n');
        Ok(buf)
    }

    fn derive(&self, scope: Scope) -> Arc<dyn Handler> {
        Arc::new(JsonHandler {
            writer: Arc::clone(&self.writer),
            options: self.options.clone(),
            scope,
        })
    }
}

impl Handler for JsonHandler {
    fn enabled(&self, level: Level) -> bool {
        level <= self.options.min_level
    }

    fn handle(&self, record: &LogRecord) -> Result<(), HandleError> {
        let buf = self.encode(record)?;
        let mut writer = self.writer.lock().map_err(|_| HandleError::Poisoned)?;
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    fn with_fields(&self, fields: Vec<(String, Value)>) -> Arc<dyn Handler> {
        self.derive(self.scope.with_fields(fields))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        self.derive(self.scope.with_group(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_one_json_object_per_record() {
        let buf = SharedBuf::default();
        let handler = JsonHandler::new(buf.clone(), JsonOptions::default());

        let record = LogRecord::caller(Level::INFO, "user logged in").with_field("user_id", 42);
        handler.handle(&record).unwrap();
        handler.handle(&LogRecord::new(Level::WARN, "second")).unwrap();

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], json!("INFO"));
        assert_eq!(lines[0]["msg"], json!("user logged in"));
        assert_eq!(lines[0]["user_id"], json!(42));
        assert_eq!(lines[0]["source"]["file"], json!(file!()));
        assert!(lines[0]["time"].is_string());
        assert!(lines[1].get("source").is_none());
    }

    #[test]
    fn source_is_left_out_when_disabled() {
        let buf = SharedBuf::default();
        let options = JsonOptions {
            add_source: false,
            ..JsonOptions::default()
        };
        let handler = JsonHandler::new(buf.clone(), options);
        handler.handle(&LogRecord::caller(Level::ERROR, "x")).unwrap();
        assert!(buf.lines()[0].get("source").is_none());
    }

    #[test]
    fn enabled_follows_min_level() {
        let handler = JsonHandler::new(SharedBuf::default(), JsonOptions::default());
        assert!(handler.enabled(Level::ERROR));
        assert!(handler.enabled(Level::INFO));
        assert!(!handler.enabled(Level::DEBUG));
    }

    #[test]
    fn derived_handlers_share_writer_but_not_fields() {
        let buf = SharedBuf::default();
        let root = JsonHandler::new(buf.clone(), JsonOptions::default());
        let derived = root
            .with_fields(vec![("service".to_string(), json!("billing"))])
            .with_group("req");

        derived
            .handle(&LogRecord::new(Level::INFO, "derived").with_field("id", "abc"))
            .unwrap();
        root.handle(&LogRecord::new(Level::INFO, "root")).unwrap();

        let lines = buf.lines();
        assert_eq!(lines[0]["service"], json!("billing"));
        assert_eq!(lines[0]["req"], json!({"id": "abc"}));
        assert!(lines[1].get("service").is_none());
        assert!(lines[1].get("req").is_none());
    }

    #[test]
    fn write_failure_is_returned() {
        let handler = JsonHandler::new(BrokenWriter, JsonOptions::default());
        let err = handler
            .handle(&LogRecord::new(Level::ERROR, "lost"))
            .unwrap_err();
        assert!(matches!(err, HandleError::Io(_)));
    }
}
