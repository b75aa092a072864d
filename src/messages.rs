/// Who may see a published event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Private,
}

/// Scan-lifecycle notifications the controller hands to its event sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    ScanningStarted,
    DeviceFound { name: String, rssi: i16 },
    ScanningStopped,
}

impl ScanEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ScanEvent::ScanningStarted | ScanEvent::ScanningStopped => "ble_scanning",
            ScanEvent::DeviceFound { .. } => "ble_device_found",
        }
    }

    pub fn payload(&self) -> String {
        match self {
            ScanEvent::ScanningStarted => "Started BLE scanning...".to_string(),
            ScanEvent::DeviceFound { name, rssi } => format!("Name: {name}, RSSI: {rssi}"),
            ScanEvent::ScanningStopped => "Device found, stopping scan".to_string(),
        }
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::Private
    }
}
