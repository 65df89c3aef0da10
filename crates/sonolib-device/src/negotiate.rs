//! Capability negotiation: who am I talking to, and what does it speak?
//!
//! Runs exactly once, right after the transport opens:
//!
//! 1. send the serial-mode handshake and collect the greeting burst;
//! 2. scan the banner for a family token and a firmware version;
//! 3. only if the banner held no family token, ask with the type query;
//! 4. only if no version was seen, ask with the info query (each
//!    identification exchange is retried once -- greeting noise is common
//!    right after opening a port);
//! 5. resolve `(family, version)` through the static compatibility table.
//!
//! No table entry means [`Error::UnsupportedDevice`] and the caller tears
//! the connection down. Reconnection always negotiates from scratch; no
//! protocol state survives a closed transport.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use sonolib_core::error::{Error, Result};
use sonolib_core::types::{DeviceFamily, DeviceInfo, FirmwareVersion};
use sonolib_protocol::{validate, Answer, CommandArg, Exchange, QueueHandle, Reply};

use crate::capability::{resolve, Capabilities};
use crate::commands::{bootstrap_info_def, bootstrap_type_def, handshake_spec, CommandDef};

/// Firmware version token as it appears in banners (`0.4`, `v0.4.1`).
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+\.\d+)").expect("valid version pattern"));

/// Outcome of a successful negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Identity of the connected device, immutable until reconnect.
    pub info: DeviceInfo,
    /// Command set, telemetry scaling, and module flags for this generation.
    pub capabilities: Capabilities,
}

/// Run the bootstrap protocol on a freshly opened connection.
pub async fn negotiate(queue: &QueueHandle, banner_window: Duration) -> Result<Negotiated> {
    let mut handshake = handshake_spec();
    handshake.response_time = banner_window;
    let banner = match queue
        .submit(Exchange::encode(&handshake, &CommandArg::None)?)
        .await
    {
        Reply::ConnectionLost => return Err(Error::ConnectionLost),
        Reply::NoData => String::new(),
        Reply::Data(text) => text,
    };
    debug!(banner = %banner, "greeting burst");

    let (banner_family, banner_firmware) = scan_identity(&banner);

    let family = match banner_family {
        Some(family) => Some(family),
        None => identify(queue, &bootstrap_type_def(), extract_family).await?,
    };
    let Some(family) = family else {
        return Err(Error::UnsupportedDevice(
            "device did not announce a recognizable family".into(),
        ));
    };

    let firmware = match banner_firmware {
        Some(firmware) => Some(firmware),
        None => identify(queue, &bootstrap_info_def(), extract_version).await?,
    };
    let Some(firmware) = firmware else {
        return Err(Error::UnsupportedDevice(format!(
            "{family} did not announce a firmware version"
        )));
    };

    let capabilities = resolve(family, firmware).ok_or_else(|| {
        Error::UnsupportedDevice(format!(
            "{family} firmware {firmware} has no compatible command set"
        ))
    })?;

    debug!(%family, %firmware, "capability negotiation complete");
    Ok(Negotiated {
        info: DeviceInfo {
            family,
            firmware,
            modules: capabilities.modules,
        },
        capabilities,
    })
}

/// Scan free-form banner text for a family token and a firmware version.
pub fn scan_identity(text: &str) -> (Option<DeviceFamily>, Option<FirmwareVersion>) {
    let family = text.parse::<DeviceFamily>().ok();
    let firmware = VERSION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    (family, firmware)
}

/// One identification exchange, retried once.
async fn identify<T>(
    queue: &QueueHandle,
    def: &CommandDef,
    extract: fn(&Answer) -> Option<T>,
) -> Result<Option<T>> {
    for attempt in 0..2 {
        if attempt > 0 {
            debug!(command = def.spec.name, "identification retry");
        }
        match queue
            .submit(Exchange::encode(&def.spec, &CommandArg::None)?)
            .await
        {
            Reply::ConnectionLost => return Err(Error::ConnectionLost),
            Reply::NoData => continue,
            Reply::Data(text) => {
                let answer = validate(&def.validators, &text);
                if let Some(value) = extract(&answer) {
                    return Ok(Some(value));
                }
            }
        }
    }
    Ok(None)
}

fn extract_family(answer: &Answer) -> Option<DeviceFamily> {
    answer.field("family")?.as_text()?.parse().ok()
}

fn extract_version(answer: &Answer) -> Option<FirmwareVersion> {
    answer.field("version")?.as_text()?.parse().ok()
}
