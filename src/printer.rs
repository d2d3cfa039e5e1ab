//! Colored stdout printer for envelope streams
//!
//! Text mode prints one line per envelope with a direction arrow; JSON mode
//! prints one JSON object per line, which `replay` accepts back verbatim.

use colored::Colorize;
use hidscope_capture::{Envelope, EventData, EventType};

use crate::filter::LogFilter;
use crate::format::{pretty_time, to_hex_string};

/// Output format for the printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the envelope printer
#[derive(Debug, Clone, Default)]
pub struct PrinterConfig {
    /// Show a hex dump line under report events
    pub show_hex: bool,
    pub format: OutputFormat,
    pub filter: LogFilter,
}

/// Prints envelopes as they arrive
pub struct EnvelopePrinter {
    config: PrinterConfig,
}

impl EnvelopePrinter {
    pub fn new(config: PrinterConfig) -> Self {
        Self { config }
    }

    /// Print one envelope if it passes the filter; returns whether it did
    pub fn print(&self, envelope: &Envelope) -> bool {
        if !self.config.filter.matches(envelope) {
            return false;
        }
        match self.config.format {
            OutputFormat::Json => match serde_json::to_string(envelope) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("failed to serialize envelope: {e}"),
            },
            OutputFormat::Text => self.print_text(envelope),
        }
        true
    }

    fn print_text(&self, envelope: &Envelope) {
        let time = pretty_time(envelope.timestamp).dimmed();
        let (arrow, label) = direction(envelope.event_type);
        let event = envelope.event_type.as_str();
        let detail = summarize(&envelope.data);

        println!("{time} {arrow} {label}  {} {detail}", event.yellow());

        if self.config.show_hex {
            if let Some(bytes) = envelope.data.bytes() {
                println!("    {}  {}", "HEX".dimmed(), to_hex_string(bytes));
            }
        }
    }
}

/// Direction arrow and colored label for an event type
fn direction(event_type: EventType) -> (colored::ColoredString, colored::ColoredString) {
    match event_type {
        EventType::OutgoingReport | EventType::OutgoingFeatureReport => {
            (">>>".cyan(), "OUT".cyan().bold())
        }
        EventType::IncomingReport | EventType::IncomingFeatureReport => {
            ("<<<".green(), "IN ".green().bold())
        }
        EventType::RequestDevice
        | EventType::RequestDeviceResult
        | EventType::RequestFeatureReport => ("***".magenta(), "REQ".magenta().bold()),
        EventType::DeviceConnect
        | EventType::DeviceDisconnect
        | EventType::DeviceOpen
        | EventType::DeviceClose => ("---".yellow(), "DEV".yellow().bold()),
    }
}

/// One-line summary of an event payload
pub fn summarize(data: &EventData) -> String {
    match data {
        EventData::Report(p) => {
            let id = p
                .report_id
                .map(|r| format!("#{r}"))
                .unwrap_or_else(|| "#-".into());
            format!("{id} [{} bytes] {}", p.data.len(), p.device)
        }
        EventData::FeatureRequest(p) => {
            let id = p
                .report_id
                .map(|r| format!("#{r}"))
                .unwrap_or_else(|| "#-".into());
            format!("{id} {}", p.device)
        }
        EventData::Request(p) => format!("{} filter(s)", p.filters.len()),
        EventData::Selection(p) => {
            let names: Vec<&str> = p
                .devices
                .iter()
                .map(|d| d.product_name.as_str())
                .collect();
            format!("{} device(s): {}", p.devices.len(), names.join(", "))
        }
        EventData::Device(d) => d.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidscope_capture::DeviceDescriptor;

    #[test]
    fn test_summarize_report() {
        let data = EventData::report(
            3,
            vec![1, 2, 3],
            DeviceDescriptor {
                product_id: 0x5030,
                vendor_id: 0x3151,
                product_name: "M1 V5".into(),
            },
        );
        let line = summarize(&data);
        assert!(line.contains("#3"));
        assert!(line.contains("3 bytes"));
        assert!(line.contains("M1 V5"));
    }

    #[test]
    fn test_filtered_envelope_not_printed() {
        let mut config = PrinterConfig::default();
        config.filter = LogFilter::with_text(Some("no-such-device".into()));
        let printer = EnvelopePrinter::new(config);
        let env = Envelope::new(
            EventType::OutgoingReport,
            EventData::report(
                1,
                vec![0],
                DeviceDescriptor {
                    product_id: 1,
                    vendor_id: 2,
                    product_name: "KB".into(),
                },
            ),
        );
        assert!(!printer.print(&env));
    }
}
