//! Webcam inventory and selection

use super::{Resolution, VideoInputDevice};
use log::debug;
use serde::Serialize;

/// Known video inputs plus the currently selected one
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebcamInventory {
    devices: Vec<VideoInputDevice>,
    selected: Option<String>,
    resolution: Resolution,
}

impl WebcamInventory {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            resolution,
        }
    }

    /// Replace the inventory with a fresh enumeration and re-apply selection.
    ///
    /// Keeps the previous selection while it is still present, otherwise picks
    /// the first device in host order, or nothing when the list is empty.
    pub fn refresh(&mut self, enumerated: Vec<VideoInputDevice>) -> Option<&VideoInputDevice> {
        self.devices.clear();
        for device in enumerated {
            match self.devices.iter_mut().find(|d| d.device_id == device.device_id) {
                Some(existing) => *existing = device,
                None => self.devices.push(device),
            }
        }

        let keep = self
            .selected
            .as_deref()
            .is_some_and(|id| self.devices.iter().any(|d| d.device_id == id));
        if !keep {
            let next = self.devices.first().map(|d| d.device_id.clone());
            if next != self.selected {
                debug!("Webcam selection changed: {:?} -> {:?}", self.selected, next);
            }
            self.selected = next;
        }

        self.selected()
    }

    pub fn selected(&self) -> Option<&VideoInputDevice> {
        let id = self.selected.as_deref()?;
        self.devices.iter().find(|d| d.device_id == id)
    }

    pub fn devices(&self) -> &[VideoInputDevice] {
        &self.devices
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }
}
