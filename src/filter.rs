//! Presentation-side packet filtering
//!
//! Pure predicates over envelopes: category toggles plus a free-text match
//! against the event type and the device product name. These never mutate
//! the packet log; they only select what gets rendered.

use std::collections::HashSet;
use std::str::FromStr;

use hidscope_capture::{Envelope, EventType};

/// Coarse event categories for display toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Input/output reports
    Reports,
    /// Feature report traffic (send, request, result)
    FeatureReports,
    /// Connect/disconnect/open/close
    Lifecycle,
    /// Device selection (requestDevice and its result)
    Discovery,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Reports,
        Category::FeatureReports,
        Category::Lifecycle,
        Category::Discovery,
    ];

    /// Category of an event type
    pub fn of(event_type: EventType) -> Category {
        match event_type {
            EventType::IncomingReport | EventType::OutgoingReport => Category::Reports,
            EventType::IncomingFeatureReport
            | EventType::OutgoingFeatureReport
            | EventType::RequestFeatureReport => Category::FeatureReports,
            EventType::DeviceConnect
            | EventType::DeviceDisconnect
            | EventType::DeviceOpen
            | EventType::DeviceClose => Category::Lifecycle,
            EventType::RequestDevice | EventType::RequestDeviceResult => Category::Discovery,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Reports => "reports",
            Category::FeatureReports => "feature",
            Category::Lifecycle => "lifecycle",
            Category::Discovery => "discovery",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reports" | "report" => Ok(Self::Reports),
            "feature" | "features" | "featurereports" => Ok(Self::FeatureReports),
            "lifecycle" | "device" | "devices" => Ok(Self::Lifecycle),
            "discovery" | "request" => Ok(Self::Discovery),
            _ => Err(format!("Unknown category: {s}")),
        }
    }
}

/// Display filter: enabled categories plus optional free text
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub text: Option<String>,
    pub categories: HashSet<Category>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            text: None,
            categories: Category::ALL.into_iter().collect(),
        }
    }
}

impl LogFilter {
    /// All categories enabled, free text set (empty text means none)
    pub fn with_text(text: Option<String>) -> Self {
        Self {
            text: text.filter(|t| !t.is_empty()),
            categories: Category::ALL.into_iter().collect(),
        }
    }

    /// Restrict to a category list (empty list leaves everything enabled)
    pub fn restrict_categories(mut self, categories: &[Category]) -> Self {
        if !categories.is_empty() {
            self.categories = categories.iter().copied().collect();
        }
        self
    }

    /// Flip one category toggle
    pub fn toggle(&mut self, category: Category) {
        if !self.categories.remove(&category) {
            self.categories.insert(category);
        }
    }

    pub fn enabled(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Whether an envelope should be shown
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.enabled(Category::of(envelope.event_type)) {
            return false;
        }
        let Some(text) = &self.text else {
            return true;
        };
        let needle = text.to_lowercase();
        if envelope
            .event_type
            .as_str()
            .to_lowercase()
            .contains(&needle)
        {
            return true;
        }
        envelope
            .data
            .device()
            .map(|d| d.product_name.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidscope_capture::{DeviceDescriptor, EventData};

    fn report_envelope(name: &str) -> Envelope {
        Envelope::new(
            EventType::OutgoingReport,
            EventData::report(
                1,
                vec![0],
                DeviceDescriptor {
                    product_id: 1,
                    vendor_id: 2,
                    product_name: name.into(),
                },
            ),
        )
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::from_str("reports").unwrap(), Category::Reports);
        assert_eq!(
            Category::from_str("Feature").unwrap(),
            Category::FeatureReports
        );
        assert_eq!(Category::from_str("device").unwrap(), Category::Lifecycle);
        assert!(Category::from_str("bogus").is_err());
    }

    #[test]
    fn test_default_filter_matches_everything() {
        assert!(LogFilter::default().matches(&report_envelope("KB")));
    }

    #[test]
    fn test_category_toggle_hides_events() {
        let mut filter = LogFilter::default();
        filter.toggle(Category::Reports);
        assert!(!filter.matches(&report_envelope("KB")));
        filter.toggle(Category::Reports);
        assert!(filter.matches(&report_envelope("KB")));
    }

    #[test]
    fn test_free_text_matches_event_type_and_product_name() {
        let filter = LogFilter::with_text(Some("outgoing".into()));
        assert!(filter.matches(&report_envelope("KB")));

        let filter = LogFilter::with_text(Some("monsgeek".into()));
        assert!(filter.matches(&report_envelope("MonsGeek M1")));
        assert!(!filter.matches(&report_envelope("Other KB")));
    }
}
