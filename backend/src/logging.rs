use tracing::{Event, Subscriber};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "warn,spinwheel_backend=info";

#[derive(Default)]
struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        }
    }
}

struct CustomLayer;

impl<S: Subscriber> Layer<S> for CustomLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        if metadata.target().contains("sqlx") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(line) = format_line(metadata.level(), metadata.target(), &visitor.0) {
            println!("{}", line);
        }
    }
}

fn format_line(level: &tracing::Level, target: &str, message: &str) -> Option<String> {
    if message.is_empty() {
        return None;
    }
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    match *level {
        tracing::Level::ERROR => Some(format!("[{}] ❌ Error: {} - {}", timestamp, target, message)),
        tracing::Level::WARN => Some(format!("[{}] ⚠️ Warning: {} - {}", timestamp, target, message)),
        tracing::Level::INFO => Some(format!("[{}] ℹ️ {} - {}", timestamp, target, message)),
        // spin progress is chatty; only the wheel driver and services get debug lines
        tracing::Level::DEBUG if target.contains("services") || target.contains("games") => {
            Some(format!("[{}] 🔄 {} - {}", timestamp, target, message))
        }
        _ => None,
    }
}

pub fn setup() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = Registry::default().with(env_filter).with(CustomLayer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging was already initialised: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_format_line_levels() {
        let line = format_line(&Level::ERROR, "spinwheel_backend::services", "boom").unwrap();
        assert!(line.contains("❌ Error: spinwheel_backend::services - boom"));
        assert!(format_line(&Level::INFO, "x", "").is_none());
        assert!(format_line(&Level::DEBUG, "spinwheel_backend::store", "quiet").is_none());
        assert!(format_line(&Level::DEBUG, "spinwheel_backend::services::wheel_service", "tick").is_some());
        assert!(format_line(&Level::TRACE, "spinwheel_backend::services", "tick").is_none());
    }
}
