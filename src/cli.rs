// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a u16 given as decimal or 0x-prefixed hex
pub fn parse_id(s: &str) -> Result<u16, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| format!("invalid hex id {s:?}: {e}"))
    } else {
        s.parse().map_err(|e| format!("invalid id {s:?}: {e}"))
    }
}

#[derive(Parser)]
#[command(name = "hidscope")]
#[command(author, version, about = "HID traffic monitor with a live packet-log panel")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show raw hex dumps alongside decoded output
    #[arg(long, global = true)]
    pub hex: bool,

    /// Free-text filter (matched against event type and product name)
    #[arg(long, global = true)]
    pub filter: Option<String>,

    /// Categories to show (reports, feature, lifecycle, discovery)
    #[arg(long, global = true, value_delimiter = ',')]
    pub categories: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Live packet-log panel (TUI); the default command
    #[command(visible_alias = "mon")]
    Monitor {
        /// Vendor id to watch (decimal or 0xHEX); all vendors if omitted
        #[arg(long, value_parser = parse_id)]
        vid: Option<u16>,
        /// Product id to watch (decimal or 0xHEX)
        #[arg(long, value_parser = parse_id)]
        pid: Option<u16>,
    },

    /// Stream envelopes to stdout
    #[command(visible_alias = "l")]
    Log {
        /// Vendor id to watch (decimal or 0xHEX); all vendors if omitted
        #[arg(long, value_parser = parse_id)]
        vid: Option<u16>,
        /// Product id to watch (decimal or 0xHEX)
        #[arg(long, value_parser = parse_id)]
        pid: Option<u16>,
        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
        /// Also append JSON lines to a record file (replayable)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Replay a recorded envelope file through the pipeline
    Replay {
        /// JSON-lines record produced by `log --output`
        file: PathBuf,
        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// List visible HID devices
    #[command(visible_aliases = ["list", "ls"])]
    Devices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_accepts_hex_and_decimal() {
        assert_eq!(parse_id("0x3151").unwrap(), 0x3151);
        assert_eq!(parse_id("0X5030").unwrap(), 0x5030);
        assert_eq!(parse_id("1024").unwrap(), 1024);
        assert!(parse_id("0xzz").is_err());
        assert!(parse_id("70000").is_err());
    }

    #[test]
    fn test_cli_parses_monitor_flags() {
        let cli = Cli::parse_from(["hidscope", "monitor", "--vid", "0x3151", "--pid", "0x5030"]);
        match cli.command {
            Some(Commands::Monitor { vid, pid }) => {
                assert_eq!(vid, Some(0x3151));
                assert_eq!(pid, Some(0x5030));
            }
            _ => panic!("expected monitor command"),
        }
    }
}
