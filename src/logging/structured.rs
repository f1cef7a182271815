use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Context attached to every message of a logger
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g. "coordinator", "balancer", "web")
    pub component: String,
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.extra_fields.insert(key.to_string(), value.to_string());
        self
    }
}

/// Logger that prefixes every event with its component context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
}

impl StructuredLogger {
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Same logger with one more context field
    pub fn with_field(&self, key: &str, value: impl ToString) -> Self {
        Self::new(self.context.clone().with_field(key, value))
    }

    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    pub(crate) fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_include_component_and_extras_in_order() {
        let logger = StructuredLogger::new(
            LogContext::new("coordinator")
                .with_field("phases", 3)
                .with_field("cycle", 12),
        );
        assert_eq!(
            logger.format_fields(),
            "component=coordinator,cycle=12,phases=3"
        );
    }

    #[test]
    fn with_field_does_not_mutate_parent() {
        let base = get_logger("balancer");
        let child = base.with_field("mode", "Eco");
        assert_eq!(base.format_fields(), "component=balancer");
        assert_eq!(child.format_fields(), "component=balancer,mode=Eco");
    }
}
