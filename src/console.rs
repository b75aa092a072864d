//! Human-readable scan table. Purely presentational: nothing here feeds back
//! into the controller, and write failures are ignored.

use std::io::Write;

use crate::decoder::DecodedDevice;

const RULE: &str = "------------------------------------------------";

pub trait Console: Send {
    fn banner(&mut self);
    fn scan_started(&mut self);
    fn scan_complete(&mut self, count: usize);
    fn device_row(&mut self, device: &DecodedDevice);
    fn match_found(&mut self, device: &DecodedDevice);
    fn no_match(&mut self);
    fn stopping(&mut self);
    /// Flush and turn every later call into a no-op.
    fn end(&mut self);
}

pub struct TableConsole<W> {
    out: W,
    enabled: bool,
}

impl<W: Write> TableConsole<W> {
    pub fn new(out: W) -> Self {
        TableConsole { out, enabled: true }
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        if self.enabled {
            let _ = writeln!(self.out, "{text}");
        }
    }
}

impl<W: Write + Send> Console for TableConsole<W> {
    fn banner(&mut self) {
        self.line(format_args!("\n========================================="));
        self.line(format_args!("   BLE Proximity Scanner"));
        self.line(format_args!("=========================================\n"));
    }

    fn scan_started(&mut self) {
        self.line(format_args!("{RULE}"));
        self.line(format_args!("Scanning for BLE devices..."));
        self.line(format_args!("{RULE}"));
        self.line(format_args!("{:<20} {:<10} {:<20}", "Address", "RSSI", "Name"));
        self.line(format_args!(
            "{:<20} {:<10} {:<20}",
            "-".repeat(20),
            "-".repeat(10),
            "-".repeat(20)
        ));
    }

    fn scan_complete(&mut self, count: usize) {
        self.line(format_args!("\nScan complete. Found {count} devices."));
    }

    fn device_row(&mut self, device: &DecodedDevice) {
        self.line(format_args!(
            "{:<20} {:<10} {:<20}",
            device.address,
            device.rssi,
            device.display_name()
        ));
    }

    fn match_found(&mut self, device: &DecodedDevice) {
        self.line(format_args!("\n  >>> Match Found! <<<"));
        self.line(format_args!(
            "  Address: {}, RSSI: {}, Name: {}",
            device.address,
            device.rssi,
            device.display_name()
        ));
        self.line(format_args!("  Additional Advertising Data:"));

        if device.service_uuids.is_empty() {
            self.line(format_args!("  No 128-bit UUIDs found."));
        }
        for uuid in &device.service_uuids {
            self.line(format_args!("  UUID: {uuid}"));
        }

        match device.major_minor {
            Some(mm) => self.line(format_args!("  Major: {}, Minor: {}", mm.major, mm.minor)),
            None => self.line(format_args!("  No Major/Minor values found.")),
        }
    }

    fn no_match(&mut self) {
        self.line(format_args!("\nNo matching devices found in this scan.\n"));
    }

    fn stopping(&mut self) {
        self.line(format_args!("\nStopping scan and serial monitoring..."));
    }

    fn end(&mut self) {
        if self.enabled {
            let _ = self.out.flush();
        }
        self.enabled = false;
    }
}
