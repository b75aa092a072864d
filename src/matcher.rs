use crate::decoder::DecodedDevice;

/// Exact, case-sensitive name match with a signal strictly stronger than
/// `rssi_threshold`. A device that advertised no name never matches.
pub fn is_match(device: &DecodedDevice, target_name: &str, rssi_threshold: i16) -> bool {
    device.name.as_deref() == Some(target_name) && device.rssi > rssi_threshold
}
