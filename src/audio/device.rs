use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{Result, ScrubError};

/// Which side of the duplex pair a device is wanted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// One entry of the system device list. `index` is the position in the
/// enumeration order and is what the transport opens by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceInfo {
    #[must_use]
    pub const fn supports(&self, direction: Direction, channels: u16) -> bool {
        match direction {
            Direction::Input => self.max_input_channels >= channels,
            Direction::Output => self.max_output_channels >= channels,
        }
    }
}

/// Output and input device indices, resolved once per re-record pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePair {
    pub output: usize,
    pub input: usize,
}

pub trait DeviceCatalog {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
}

/// Find the first device whose name contains `name_substring`
/// (case-insensitive) and which offers at least `channels` channels in
/// `direction`.
pub fn find_device_index(
    catalog: &dyn DeviceCatalog,
    name_substring: &str,
    direction: Direction,
    channels: u16,
) -> Result<usize> {
    let needle = name_substring.to_lowercase();

    catalog
        .devices()?
        .into_iter()
        .find(|d| d.name.to_lowercase().contains(&needle) && d.supports(direction, channels))
        .map(|d| d.index)
        .ok_or_else(|| ScrubError::DeviceNotFound {
            name: name_substring.to_string(),
            direction,
            channels,
        })
}

pub fn resolve_pair(
    catalog: &dyn DeviceCatalog,
    output_name: &str,
    input_name: &str,
    channels: u16,
) -> Result<DevicePair> {
    let output = find_device_index(catalog, output_name, Direction::Output, channels)?;
    let input = find_device_index(catalog, input_name, Direction::Input, channels)?;
    Ok(DevicePair { output, input })
}

/// Devices usable in at least one direction, in enumeration order.
pub fn available_devices(catalog: &dyn DeviceCatalog) -> Result<Vec<DeviceInfo>> {
    Ok(catalog
        .devices()?
        .into_iter()
        .filter(|d| d.max_input_channels > 0 || d.max_output_channels > 0)
        .collect())
}

/// Device catalog backed by the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCatalog;

impl DeviceCatalog for CpalCatalog {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| ScrubError::Transport(format!("failed to enumerate devices: {e}")))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| DeviceInfo {
                index,
                name: device_name(&device),
                max_input_channels: max_input_channels(&device),
                max_output_channels: max_output_channels(&device),
            })
            .collect())
    }
}

/// Open the device at `index` of the default host's enumeration.
pub(crate) fn cpal_device(host: &cpal::Host, index: usize) -> Result<cpal::Device> {
    host.devices()
        .map_err(|e| ScrubError::Transport(format!("failed to enumerate devices: {e}")))?
        .nth(index)
        .ok_or_else(|| ScrubError::Transport(format!("device index {index} is no longer present")))
}

pub(crate) fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .ok()
        .map_or_else(|| "<unknown>".to_string(), |desc| desc.name().to_string())
}

fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .ok()
        .and_then(|configs| configs.map(|c| c.channels()).max())
        .unwrap_or(0)
}

fn max_output_channels(device: &cpal::Device) -> u16 {
    device
        .supported_output_configs()
        .ok()
        .and_then(|configs| configs.map(|c| c.channels()).max())
        .unwrap_or(0)
}
