//! Human-readable descriptions shown to the user while a turn is running.
//!
//! Tool descriptions and event-kind descriptions live in two separate tables:
//! they are keyed by different namespaces and have different fallbacks.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::DescriptionsConfig;

/// Text displayed when a tool call starts and when its result arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub start: String,
    pub end: String,
}

impl ToolDescription {
    fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

const BUILTIN_TOOLS: &[(&str, &str, &str)] = &[
    (
        "getAccountsByUserName",
        "Looking up your account for your user name...",
        "Retrieved your accounts",
    ),
    (
        "getAccountDetails",
        "Fetching your account details...",
        "Fetched your account details",
    ),
    (
        "getPaymentMethodDetails",
        "Fetching your payment method details...",
        "Fetched your payment method details",
    ),
    (
        "getTransactionsByRecipientName",
        "Searching transactions for the recipient...",
        "Found transactions for the recipient",
    ),
    (
        "scan_invoice",
        "Extracting data from the uploaded image...",
        "Data extracted from the uploaded image",
    ),
    (
        "processPayment",
        "Processing your payment...",
        "Payment processed",
    ),
    (
        "getCreditCards",
        "Retrieving your credit cards...",
        "Retrieved your credit cards",
    ),
    (
        "getCardDetails",
        "Fetching your credit card details...",
        "Fetched your credit card details",
    ),
    (
        "getCardTransactions",
        "Looking up transactions for your credit card...",
        "Retrieved transactions for your credit card",
    ),
];

const BUILTIN_EVENTS: &[(&str, &str)] = &[("WorkflowStartedEvent", "Processing your request ...")];

/// Tool name -> start/end descriptions. Unknown tools are described by their name.
#[derive(Debug, Clone, Default)]
pub struct ToolDescriptions {
    entries: FxHashMap<String, ToolDescription>,
}

impl ToolDescriptions {
    #[must_use]
    pub fn builtin() -> Self {
        let entries = BUILTIN_TOOLS
            .iter()
            .map(|(name, start, end)| ((*name).to_string(), ToolDescription::new(start, end)))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, tool_name: impl Into<String>, description: ToolDescription) {
        self.entries.insert(tool_name.into(), description);
    }

    #[must_use]
    pub fn get(&self, tool_name: &str) -> Option<&ToolDescription> {
        self.entries.get(tool_name)
    }

    #[must_use]
    pub fn start<'a>(&'a self, tool_name: &'a str) -> &'a str {
        self.get(tool_name).map_or(tool_name, |d| d.start.as_str())
    }

    #[must_use]
    pub fn end<'a>(&'a self, tool_name: &'a str) -> &'a str {
        self.get(tool_name).map_or(tool_name, |d| d.end.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Event kind name -> description. Unknown kinds are described by their kind name.
#[derive(Debug, Clone, Default)]
pub struct EventDescriptions {
    entries: FxHashMap<String, String>,
}

impl EventDescriptions {
    #[must_use]
    pub fn builtin() -> Self {
        let entries = BUILTIN_EVENTS
            .iter()
            .map(|(kind, text)| ((*kind).to_string(), (*text).to_string()))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, kind_name: impl Into<String>, description: impl Into<String>) {
        self.entries.insert(kind_name.into(), description.into());
    }

    #[must_use]
    pub fn describe<'a>(&'a self, kind_name: &'a str) -> &'a str {
        self.entries.get(kind_name).map_or(kind_name, String::as_str)
    }
}

/// Both tables, shared read-only by every translator.
#[derive(Debug, Clone)]
pub struct Descriptions {
    pub tools: ToolDescriptions,
    pub events: EventDescriptions,
}

impl Descriptions {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            tools: ToolDescriptions::builtin(),
            events: EventDescriptions::builtin(),
        }
    }

    /// Built-in tables with the configured entries layered on top.
    #[must_use]
    pub fn from_config(config: &DescriptionsConfig) -> Self {
        let mut descriptions = Self::builtin();
        for (name, description) in &config.tools {
            descriptions.tools.insert(name.clone(), description.clone());
        }
        for (kind, text) in &config.events {
            descriptions.events.insert(kind.clone(), text.clone());
        }
        descriptions
    }
}

impl Default for Descriptions {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tool_lookup() {
        let tools = ToolDescriptions::builtin();
        assert_eq!(tools.len(), 9);
        assert_eq!(tools.start("processPayment"), "Processing your payment...");
        assert_eq!(tools.end("scan_invoice"), "Data extracted from the uploaded image");
    }

    #[test]
    fn test_unknown_tool_falls_back_to_name() {
        let tools = ToolDescriptions::builtin();
        assert_eq!(tools.start("lookupWeather"), "lookupWeather");
        assert_eq!(tools.end("lookupWeather"), "lookupWeather");
    }

    #[test]
    fn test_event_lookup_and_fallback() {
        let events = EventDescriptions::builtin();
        assert_eq!(events.describe("WorkflowStartedEvent"), "Processing your request ...");
        assert_eq!(events.describe("ExecutorInvokedEvent"), "ExecutorInvokedEvent");
    }

    #[test]
    fn test_tables_do_not_share_keys() {
        let descriptions = Descriptions::builtin();
        assert_eq!(descriptions.events.describe("processPayment"), "processPayment");
        assert_eq!(
            descriptions.tools.start("WorkflowStartedEvent"),
            "WorkflowStartedEvent"
        );
    }

    #[test]
    fn test_config_overrides_builtin_entries() {
        let mut config = DescriptionsConfig::default();
        config.tools.insert(
            "processPayment".into(),
            ToolDescription::new("Sending money...", "Money sent"),
        );
        config
            .events
            .insert("ExecutorInvokedEvent".into(), "Thinking...".into());
        let descriptions = Descriptions::from_config(&config);
        assert_eq!(descriptions.tools.start("processPayment"), "Sending money...");
        assert_eq!(descriptions.tools.end("getCreditCards"), "Retrieved your credit cards");
        assert_eq!(descriptions.events.describe("ExecutorInvokedEvent"), "Thinking...");
    }
}
