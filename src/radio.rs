//! Radio side of the scan loop: raw advertisement records, the fixed-size
//! buffer a scan fills, and the btleplug-backed radio.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::StreamExt as _;
use log::{debug, warn};
use mac_address::MacAddress;
use tokio::time::{Instant, sleep_until};

use crate::decoder::{ADV_MAX_LEN, ad_type};
use crate::error::Result;

/// One advertisement as received from the radio. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAdvertisement {
    address: MacAddress,
    rssi: i16,
    data: Vec<u8>,
}

impl RawAdvertisement {
    /// Payloads longer than the link-layer limit are cut to it.
    pub fn new(address: [u8; 6], rssi: i16, data: &[u8]) -> Self {
        RawAdvertisement {
            address: MacAddress::new(address),
            rssi,
            data: data[..data.len().min(ADV_MAX_LEN)].to_vec(),
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Fixed-capacity result buffer reused by every scan cycle. Records pushed
/// past capacity are dropped.
#[derive(Debug)]
pub struct ScanBuffer {
    results: Vec<RawAdvertisement>,
    capacity: usize,
}

impl ScanBuffer {
    pub fn new(capacity: usize) -> Self {
        ScanBuffer {
            results: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_full(&self) -> bool {
        self.results.len() >= self.capacity
    }

    /// Returns false when the buffer is already full.
    pub fn push(&mut self, advertisement: RawAdvertisement) -> bool {
        if self.is_full() {
            return false;
        }
        self.results.push(advertisement);
        true
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawAdvertisement> {
        self.results.iter()
    }
}

#[async_trait]
pub trait Radio: Send {
    /// Run one blocking scan, filling `buffer` up to its capacity. Returns
    /// the number of records written.
    async fn scan(&mut self, buffer: &mut ScanBuffer) -> Result<usize>;

    /// Stop scanning. Calling it while idle is a no-op.
    async fn stop_scanning(&mut self) -> Result<()>;
}

pub struct BtleRadio {
    adapter: Adapter,
    scan_duration: Duration,
    scanning: bool,
}

impl BtleRadio {
    pub fn new(adapter: Adapter, scan_duration: Duration) -> Self {
        BtleRadio {
            adapter,
            scan_duration,
            scanning: false,
        }
    }

    /// Collect peripheral ids in the order they are first reported, until
    /// the scan window closes. Not capped at the buffer size: ids without an
    /// RSSI are dropped later and must not take a slot.
    async fn collect_ids(&mut self) -> Result<Vec<PeripheralId>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        self.scanning = true;

        let deadline = Instant::now() + self.scan_duration;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id))
                    | Some(CentralEvent::DeviceUpdated(id))
                    | Some(CentralEvent::ManufacturerDataAdvertisement { id, .. })
                    | Some(CentralEvent::ServiceDataAdvertisement { id, .. }) => {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                    Some(_) => {}
                    None => {
                        debug!("Central event stream closed");
                        break;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        Ok(ids)
    }

    async fn lookup_properties(&self, id: PeripheralId) -> Result<Option<PeripheralProperties>> {
        let peripheral = self.adapter.peripheral(&id).await?;
        Ok(peripheral.properties().await?)
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn scan(&mut self, buffer: &mut ScanBuffer) -> Result<usize> {
        let collected = self.collect_ids().await;
        if let Err(err) = self.stop_scanning().await {
            warn!("Failed to stop BLE scan: {}", err);
        }

        let radio = &*self;
        Ok(fill_buffer(collected?, buffer, |id| radio.lookup_properties(id)).await)
    }

    async fn stop_scanning(&mut self) -> Result<()> {
        if !self.scanning {
            return Ok(());
        }
        self.scanning = false;
        self.adapter.stop_scan().await?;
        debug!("BLE scan stopped");
        Ok(())
    }
}

/// Look up each id in discovery order and push the usable ones until the
/// buffer is full. A failed lookup skips that peripheral only.
async fn fill_buffer<I, F, Fut>(ids: Vec<I>, buffer: &mut ScanBuffer, mut lookup: F) -> usize
where
    I: Clone + fmt::Debug,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<Option<PeripheralProperties>>>,
{
    let mut written = 0;
    for id in ids {
        if buffer.is_full() {
            break;
        }

        let properties = match lookup(id.clone()).await {
            Ok(Some(properties)) => properties,
            Ok(None) => {
                debug!("No properties for {:?}", id);
                continue;
            }
            Err(err) => {
                warn!("Skipping peripheral {:?}: {}", id, err);
                continue;
            }
        };
        let Some(advertisement) = to_advertisement(&properties) else {
            debug!("Skipping {} without RSSI", properties.address);
            continue;
        };

        buffer.push(advertisement);
        written += 1;
    }

    written
}

/// None when the peripheral has no RSSI reading yet.
fn to_advertisement(properties: &PeripheralProperties) -> Option<RawAdvertisement> {
    let rssi = properties.rssi?;
    let data = encode_properties(properties);
    Some(RawAdvertisement::new(properties.address.into_inner(), rssi, &data))
}

/// Rebuild an advertisement block from the properties btleplug has decoded.
/// Structures that would push the block past the link-layer limit are left
/// out.
pub fn encode_properties(properties: &PeripheralProperties) -> Vec<u8> {
    let mut block = Vec::with_capacity(ADV_MAX_LEN);

    if let Some(name) = &properties.local_name {
        push_structure(&mut block, ad_type::COMPLETE_LOCAL_NAME, &[name.as_bytes()]);
    }

    let mut companies: Vec<_> = properties.manufacturer_data.iter().collect();
    companies.sort_by_key(|(company, _)| **company);
    for (company, payload) in companies {
        push_structure(
            &mut block,
            ad_type::MANUFACTURER_SPECIFIC_DATA,
            &[&company.to_le_bytes(), payload],
        );
    }

    let mut services: Vec<_> = properties.service_data.iter().collect();
    services.sort_by_key(|(uuid, _)| **uuid);
    for (uuid, payload) in services {
        let mut uuid_le = *uuid.as_bytes();
        uuid_le.reverse();
        push_structure(
            &mut block,
            ad_type::SERVICE_DATA_128BIT_UUID,
            &[&uuid_le, payload],
        );
    }

    block
}

fn push_structure(block: &mut Vec<u8>, tag: u8, parts: &[&[u8]]) {
    let payload_len: usize = parts.iter().map(|part| part.len()).sum();
    // length byte + type byte + payload
    if payload_len + 1 > u8::MAX as usize || block.len() + 2 + payload_len > ADV_MAX_LEN {
        return;
    }

    block.push(payload_len as u8 + 1);
    block.push(tag);
    for part in parts {
        block.extend_from_slice(part);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use btleplug::api::BDAddr;
    use futures::future::ready;
    use uuid::Uuid;

    use super::*;
    use crate::decoder::{
        DecodedDevice, MajorMinor, extract_major_minor, extract_name, extract_service_uuids,
    };
    use crate::error::Error;

    fn advertisement(n: u8) -> RawAdvertisement {
        RawAdvertisement::new([n; 6], -40 - n as i16, &[])
    }

    #[test]
    fn test_buffer_drops_past_capacity() {
        let mut buffer = ScanBuffer::new(2);
        assert!(buffer.push(advertisement(1)));
        assert!(buffer.push(advertisement(2)));
        assert!(buffer.is_full());
        assert!(!buffer.push(advertisement(3)));
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_raw_advertisement_cut_to_link_limit() {
        let raw = RawAdvertisement::new([0; 6], -50, &[0x11; 40]);
        assert_eq!(raw.data().len(), ADV_MAX_LEN);
    }

    #[test]
    fn test_encode_properties_decodes_back() {
        let uuid = Uuid::parse_str("e2c56db5-dffb-48d2-b060-d0f5a71096e0").unwrap();
        let properties = PeripheralProperties {
            local_name: Some("Bcn".to_string()),
            manufacturer_data: HashMap::from([(0x004C, vec![0x00, 0x05, 0x00, 0x09])]),
            service_data: HashMap::from([(uuid, vec![])]),
            ..Default::default()
        };

        let block = encode_properties(&properties);
        assert!(block.len() <= ADV_MAX_LEN);
        assert_eq!(extract_name(&block, ADV_MAX_LEN).as_deref(), Some("Bcn"));
        assert_eq!(
            extract_major_minor(&block, ADV_MAX_LEN),
            Some(MajorMinor { major: 5, minor: 9 })
        );
        assert_eq!(extract_service_uuids(&block, ADV_MAX_LEN), vec![uuid]);
    }

    #[test]
    fn test_encode_properties_skips_structures_that_do_not_fit() {
        let uuid = Uuid::from_u128(1);
        let properties = PeripheralProperties {
            local_name: Some("A fairly long device name".to_string()),
            service_data: HashMap::from([(uuid, vec![])]),
            ..Default::default()
        };

        let block = encode_properties(&properties);
        assert!(block.len() <= ADV_MAX_LEN);
        assert_eq!(
            extract_name(&block, ADV_MAX_LEN).as_deref(),
            Some("A fairly long device name")
        );
        assert!(extract_service_uuids(&block, ADV_MAX_LEN).is_empty());
    }

    fn peripheral(n: u8, name: &str, rssi: Option<i16>) -> PeripheralProperties {
        PeripheralProperties {
            address: BDAddr::from([n; 6]),
            local_name: Some(name.to_string()),
            rssi,
            ..Default::default()
        }
    }

    #[test]
    fn test_to_advertisement_needs_rssi() {
        assert_eq!(to_advertisement(&peripheral(1, "BeaconA", None)), None);

        let raw = to_advertisement(&peripheral(1, "BeaconA", Some(-48))).unwrap();
        assert_eq!(raw.rssi(), -48);
        assert_eq!(raw.address(), MacAddress::new([1; 6]));
        assert_eq!(extract_name(raw.data(), ADV_MAX_LEN).as_deref(), Some("BeaconA"));
    }

    #[tokio::test]
    async fn test_failed_lookup_skips_only_that_peripheral() {
        let mut buffer = ScanBuffer::new(10);
        let written = fill_buffer(vec![1u8, 2], &mut buffer, |id| {
            ready(match id {
                1 => Err(Error::from(btleplug::Error::DeviceNotFound)),
                _ => Ok(Some(peripheral(id, "BeaconA", Some(-50)))),
            })
        })
        .await;

        assert_eq!(written, 1);
        let device = DecodedDevice::decode(buffer.iter().next().unwrap());
        assert_eq!(device.name.as_deref(), Some("BeaconA"));
        assert_eq!(device.rssi, -50);
    }

    #[tokio::test]
    async fn test_peripherals_without_rssi_do_not_take_slots() {
        let mut buffer = ScanBuffer::new(2);
        let written = fill_buffer(vec![1u8, 2, 3], &mut buffer, |id| {
            let rssi = if id == 1 { None } else { Some(-60) };
            ready(Ok(Some(peripheral(id, "Dev", rssi))))
        })
        .await;

        assert_eq!(written, 2);
        let addresses: Vec<_> = buffer.iter().map(|raw| raw.address()).collect();
        assert_eq!(
            addresses,
            vec![MacAddress::new([2; 6]), MacAddress::new([3; 6])]
        );
    }

    #[tokio::test]
    async fn test_fill_stops_looking_up_once_full() {
        let mut lookups = Vec::new();
        let mut buffer = ScanBuffer::new(1);
        let written = fill_buffer(vec![1u8, 2, 3, 4], &mut buffer, |id| {
            lookups.push(id);
            ready(match id {
                1 => Ok(None),
                _ => Ok(Some(peripheral(id, "Dev", Some(-70)))),
            })
        })
        .await;

        assert_eq!(written, 1);
        assert_eq!(lookups, vec![1, 2]);
        assert_eq!(buffer.iter().next().unwrap().address(), MacAddress::new([2; 6]));
    }
}
