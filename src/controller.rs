//! Scan-parse-match loop.
//!
//! The controller runs one scan cycle per [`ScanController::step`], decodes
//! every advertisement in the returned session, and stops for good once a
//! device satisfies the match predicate. Whether the start event was sent and
//! whether a device was found are both read off [`ControllerState`]; there are
//! no separate flags.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::config::ScanSettings;
use crate::console::Console;
use crate::decoder::DecodedDevice;
use crate::error::Result;
use crate::matcher::is_match;
use crate::messages::ScanEvent;
use crate::radio::{Radio, ScanBuffer};

/// One-way channel for scan-lifecycle events.
#[async_trait]
pub trait EventSink: Send {
    async fn publish(&mut self, event: &ScanEvent) -> Result<()>;
}

/// Network link the events travel over.
pub trait Link: Send {
    fn connected(&self) -> bool;

    /// Ask for a reconnect and return without waiting for it.
    fn connect(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Scanning,
    Found,
    Stopped,
}

/// What the caller should do after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Wait(Duration),
    Halt,
}

pub struct ScanController<R, L, S, C> {
    radio: R,
    link: L,
    sink: S,
    console: C,
    settings: ScanSettings,
    state: ControllerState,
    buffer: ScanBuffer,
}

impl<R, L, S, C> ScanController<R, L, S, C>
where
    R: Radio,
    L: Link,
    S: EventSink,
    C: Console,
{
    pub fn new(radio: R, link: L, sink: S, console: C, settings: ScanSettings) -> Self {
        let buffer = ScanBuffer::new(settings.result_limit);
        ScanController {
            radio,
            link,
            sink,
            console,
            settings,
            state: ControllerState::Idle,
            buffer,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Step until the controller halts, sleeping between steps.
    pub async fn run(&mut self) {
        self.console.banner();
        info!(
            "Scanning for '{}' stronger than {} dBm",
            self.settings.target_name, self.settings.rssi_threshold
        );

        loop {
            match self.step().await {
                Step::Wait(delay) => tokio::time::sleep(delay).await,
                Step::Halt => break,
            }
        }

        info!("Scan controller stopped");
    }

    /// Run a single loop iteration: at most one scan cycle.
    pub async fn step(&mut self) -> Step {
        match self.state {
            ControllerState::Stopped => Step::Halt,
            ControllerState::Found => {
                self.console.end();
                self.state = ControllerState::Stopped;
                info!("Output disabled, controller stopped");
                Step::Halt
            }
            ControllerState::Idle | ControllerState::Scanning => {
                if !self.link.connected() {
                    debug!("Link down, deferring scan");
                    self.link.connect();
                    return Step::Wait(self.settings.reconnect_delay);
                }

                if self.state == ControllerState::Idle {
                    self.publish(ScanEvent::ScanningStarted).await;
                    self.state = ControllerState::Scanning;
                }

                self.scan_cycle().await
            }
        }
    }

    async fn scan_cycle(&mut self) -> Step {
        self.console.scan_started();
        self.buffer.clear();

        let count = match self.radio.scan(&mut self.buffer).await {
            Ok(count) => count.min(self.buffer.len()),
            Err(err) => {
                warn!("BLE scan failed: {}", err);
                0
            }
        };
        self.console.scan_complete(count);

        let mut matched: Option<DecodedDevice> = None;
        for raw in self.buffer.iter().take(count) {
            let device = DecodedDevice::decode(raw);
            debug!("Decoded {:?}", device);
            self.console.device_row(&device);

            if matched.is_none()
                && is_match(
                    &device,
                    &self.settings.target_name,
                    self.settings.rssi_threshold,
                )
            {
                matched = Some(device);
            }
        }

        match matched {
            Some(device) => self.on_match(device).await,
            None => {
                self.console.no_match();
                Step::Wait(self.settings.interscan_delay)
            }
        }
    }

    async fn on_match(&mut self, device: DecodedDevice) -> Step {
        info!(
            "Matched {} at {} dBm ({})",
            device.display_name(),
            device.rssi,
            device.address
        );
        self.console.match_found(&device);

        self.publish(ScanEvent::DeviceFound {
            name: device.display_name().to_string(),
            rssi: device.rssi,
        })
        .await;

        self.console.stopping();
        self.publish(ScanEvent::ScanningStopped).await;
        if let Err(err) = self.radio.stop_scanning().await {
            warn!("Failed to stop scanning: {}", err);
        }

        self.state = ControllerState::Found;
        Step::Wait(self.settings.settle_delay)
    }

    async fn publish(&mut self, event: ScanEvent) {
        if let Err(err) = self.sink.publish(&event).await {
            warn!("Failed to publish {:?}: {}", event, err);
        }
    }
}
