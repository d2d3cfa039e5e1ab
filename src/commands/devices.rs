use anyhow::{Context, Result};
use colored::Colorize;
use hidapi::HidApi;

/// List every HID device visible to the process
pub fn run() -> Result<()> {
    let api = HidApi::new().context("failed to initialize HID access")?;
    let mut devices: Vec<_> = api.device_list().collect();
    devices.sort_by_key(|d| (d.vendor_id(), d.product_id()));

    if devices.is_empty() {
        println!("No HID devices found");
        return Ok(());
    }

    println!(
        "{:>9}  {:<34}  {:<20}  {}",
        "VID:PID".bold(),
        "Product".bold(),
        "Manufacturer".bold(),
        "Path".bold()
    );
    for info in devices {
        println!(
            "{:04x}:{:04x}  {:<34}  {:<20}  {}",
            info.vendor_id(),
            info.product_id(),
            info.product_string().unwrap_or("-"),
            info.manufacturer_string().unwrap_or("-"),
            info.path().to_string_lossy().dimmed()
        );
    }
    Ok(())
}
