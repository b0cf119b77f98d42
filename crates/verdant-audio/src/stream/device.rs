//! Audio device discovery
//!
//! Probes every available host (JACK, ALSA, PulseAudio, ...) and reduces each
//! output device to the facts stream negotiation cares about: channel count
//! and the raw sample-rate ranges its configurations cover. Callers can then
//! ask whether a device can satisfy a given [`StreamParams`] before opening
//! anything.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::{DeviceId, StreamParams};
use super::error::{StreamError, StreamResult};

/// Rates offered through [`AudioDevice::sample_rates`]
const STANDARD_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];

fn host_label(host_id: HostId) -> String {
    // Variant name via Debug; a couple of them read better upcased.
    match format!("{:?}", host_id).as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        other => other.to_string(),
    }
}

fn host_with_label(label: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_label(*id) == label)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// An output device reduced to its negotiable capabilities
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Identifier to put in a [`StreamParams`]
    pub id: DeviceId,
    pub name: String,
    /// Host backend label (e.g. "ALSA", "JACK")
    pub host: String,
    /// Whether this is its host's default output
    pub is_default: bool,
    pub max_channels: u16,
    /// Inclusive `(min, max)` rate ranges, one per supported configuration
    rate_ranges: Vec<(u32, u32)>,
}

impl AudioDevice {
    pub fn supports_rate(&self, rate: u32) -> bool {
        self.rate_ranges
            .iter()
            .any(|&(lo, hi)| rate >= lo && rate <= hi)
    }

    /// True when the device can satisfy the request's channel count and
    /// sample rate. A request without an explicit rate matches any device.
    pub fn supports(&self, params: &StreamParams) -> bool {
        if self.max_channels < params.channels {
            return false;
        }
        match params.sample_rate {
            Some(rate) => self.supports_rate(rate),
            None => true,
        }
    }

    /// The standard rates this device can run at
    pub fn sample_rates(&self) -> Vec<u32> {
        STANDARD_RATES
            .iter()
            .copied()
            .filter(|&rate| self.supports_rate(rate))
            .collect()
    }
}

fn probe_device(
    device: &cpal::Device,
    host: &str,
    default_name: Option<&str>,
) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    let configs = device.supported_output_configs().ok()?;

    let mut max_channels = 0u16;
    let mut rate_ranges = Vec::new();
    for config in configs {
        max_channels = max_channels.max(config.channels());
        rate_ranges.push((config.min_sample_rate().0, config.max_sample_rate().0));
    }
    if rate_ranges.is_empty() {
        // A device with no output configurations cannot be opened.
        return None;
    }
    rate_ranges.sort_unstable();
    rate_ranges.dedup();

    Some(AudioDevice {
        id: DeviceId::with_host(&name, host),
        is_default: default_name == Some(name.as_str()),
        name,
        host: host.to_string(),
        max_channels,
        rate_ranges,
    })
}

/// Probe every host and collect all openable output devices.
///
/// Defaults sort first, then host label, then name. `Err(NoDevices)` when
/// nothing is openable anywhere.
pub fn output_devices() -> StreamResult<Vec<AudioDevice>> {
    let mut found: Vec<AudioDevice> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::debug!("Skipping audio host {:?}: {}", host_id, e);
                continue;
            }
        };
        let label = host_label(host_id);
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::debug!("Host {} outputs unavailable: {}", label, e);
                continue;
            }
        };
        found.extend(
            devices.filter_map(|device| probe_device(&device, &label, default_name.as_deref())),
        );
    }

    if found.is_empty() {
        return Err(StreamError::NoDevices);
    }
    found.sort_by_key(|d| (!d.is_default, d.host.clone(), d.name.clone()));
    log::debug!("{} openable output devices", found.len());
    Ok(found)
}

/// The devices that can satisfy `params`, best candidates first.
///
/// `Err(NoDevices)` when devices exist but none fits the request.
pub fn devices_for(params: &StreamParams) -> StreamResult<Vec<AudioDevice>> {
    let mut devices = output_devices()?;
    devices.retain(|d| d.supports(params));
    if devices.is_empty() {
        return Err(StreamError::NoDevices);
    }
    Ok(devices)
}

/// The default output device, or the first openable one when no host
/// reports a default.
pub fn default_output_device() -> StreamResult<AudioDevice> {
    let mut devices = output_devices()?;
    let best = devices.iter().position(|d| d.is_default).unwrap_or(0);
    Ok(devices.swap_remove(best))
}

/// Resolve a [`DeviceId`] to the concrete cpal device.
///
/// A recognized host label narrows the search to that host; otherwise every
/// host is searched in order.
pub fn find_device(id: &DeviceId) -> StreamResult<cpal::Device> {
    let hosts: Vec<Host> = match id.host.as_deref().and_then(host_with_label) {
        Some(host) => vec![host],
        None => cpal::available_hosts()
            .into_iter()
            .filter_map(|host_id| cpal::host_from_id(host_id).ok())
            .collect(),
    };

    for host in hosts {
        let Ok(mut devices) = host.output_devices() else {
            continue;
        };
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(id.name.as_str())) {
            return Ok(device);
        }
    }
    Err(StreamError::DeviceNotFound(id.name.clone()))
}

/// The default host's default output device
pub fn cpal_default_device() -> StreamResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| StreamError::NoDefaultDevice("No default output device".to_string()))
}
