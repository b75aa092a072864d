//! Error types shared by the radio, broker and configuration layers.
//!
//! The scan controller never propagates these: it logs and absorbs them so
//! the loop keeps running. Only startup code in `main` treats them as fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The Bluetooth stack reported a failure.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The MQTT client request queue rejected a request.
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No Bluetooth adapter is present on this host.
    #[error("No Bluetooth adapter found")]
    NoAdapter,
}

pub type Result<T> = std::result::Result<T, Error>;
