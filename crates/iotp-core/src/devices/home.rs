//! The `Home` device registry and its snapshot encoding.
//!
//! # Snapshot layout
//!
//! The INITIAL message carries the whole home.  Devices are grouped by kind
//! in [`DeviceType::ALL`] order, each group prefixed with its count:
//!
//! ```text
//! for each kind (light, blind, thermo, tv, slock):
//!     [count:1]
//!     for each device:
//!         [name:16, space padded][state:1][params: kind.param_count()]
//! ```
//!
//! # Concurrency
//!
//! `Home` itself is a plain value.  The server shares one home between all
//! sessions through [`SharedHome`], whose mutex is the single critical
//! section that orders every device mutation.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::devices::action::DeviceAction;
use crate::devices::device::{Device, DeviceError, DeviceType, NAME_LEN};

const KIND_COUNT: usize = DeviceType::ALL.len();

/// A collection of devices grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Home {
    devices: [Vec<Device>; KIND_COUNT],
}

impl Home {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device and returns its index within its kind.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidDevice`] once a kind already holds 255
    /// devices, the most a snapshot count byte can describe.
    pub fn add_device(&mut self, device: Device) -> Result<u8, DeviceError> {
        let device_type = device.device_type();
        let group = &mut self.devices[usize::from(device_type.code())];
        let index = u8::try_from(group.len())
            .ok()
            .filter(|&i| i < u8::MAX)
            .ok_or_else(|| DeviceError::InvalidDevice {
                device_type,
                reason: "too many devices of this kind".to_string(),
            })?;
        group.push(device);
        Ok(index)
    }

    pub fn devices(&self, device_type: DeviceType) -> &[Device] {
        &self.devices[usize::from(device_type.code())]
    }

    pub fn device(&self, device_type: DeviceType, index: u8) -> Option<&Device> {
        self.devices(device_type).get(usize::from(index))
    }

    /// Total number of devices across all kinds.
    pub fn device_count(&self) -> usize {
        self.devices.iter().map(Vec::len).sum()
    }

    /// Applies an action to the addressed device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device type or index does not exist, or
    /// the device itself refuses the opcode.  Nothing changes on error.
    pub fn apply_action(&mut self, action: &DeviceAction) -> Result<(), DeviceError> {
        let device_type = DeviceType::from_code(action.device_type)
            .ok_or(DeviceError::UnknownDeviceType(action.device_type))?;
        let device = self.devices[usize::from(action.device_type)]
            .get_mut(usize::from(action.device_index))
            .ok_or(DeviceError::UnknownDevice {
                device_type,
                index: action.device_index,
            })?;
        device.apply(action.opcode, &action.params)
    }

    /// Serializes every device into the INITIAL payload.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for group in &self.devices {
            // `add_device` caps each group below 256 entries.
            buf.push(group.len() as u8);
            for device in group {
                device.write_snapshot(&mut buf);
            }
        }
        buf
    }

    /// Rebuilds a home from an INITIAL payload.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::MalformedSnapshot`] if the payload is truncated,
    /// has trailing bytes, or describes a device with an invalid state.
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, DeviceError> {
        let mut reader = SnapshotReader { bytes, pos: 0 };
        let mut home = Home::new();

        for device_type in DeviceType::ALL {
            let count = reader.take(1, "device count")?[0];
            for _ in 0..count {
                let raw_name = reader.take(NAME_LEN, "device name")?;
                let name = String::from_utf8_lossy(raw_name).trim_end().to_string();
                let state = reader.take(1, "device state")?[0];
                let params = reader
                    .take(device_type.param_count(), "device parameters")?
                    .to_vec();
                let device = Device::new(device_type, name, state, params)
                    .map_err(|e| DeviceError::MalformedSnapshot(e.to_string()))?;
                home.add_device(device)?;
            }
        }

        if reader.pos != bytes.len() {
            return Err(DeviceError::MalformedSnapshot(format!(
                "{} trailing byte(s)",
                bytes.len() - reader.pos
            )));
        }
        Ok(home)
    }
}

struct SnapshotReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], DeviceError> {
        let end = self.pos + len;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            DeviceError::MalformedSnapshot(format!("truncated while reading {what} at byte {}", self.pos))
        })?;
        self.pos = end;
        Ok(slice)
    }
}

impl fmt::Display for Home {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = "==============================================================";
        const THIN: &str = "--------------------------------------------------------------";
        writeln!(f, "{RULE}")?;
        writeln!(f, "Home current state:")?;
        writeln!(f, "{:<7}{:<4} {:<16} {:<10} Params", "Type", "Num", "Name", "State")?;
        for device_type in DeviceType::ALL {
            writeln!(f, "{THIN}")?;
            for (index, device) in self.devices(device_type).iter().enumerate() {
                let label = if index == 0 { device_type.kind().label } else { "" };
                writeln!(f, "{label:<7}#{index:03} {device}")?;
            }
        }
        write!(f, "{RULE}")
    }
}

// ── Shared home ───────────────────────────────────────────────────────────────

/// A [`Home`] shared by every server session.
///
/// All mutation goes through [`apply_action_then`](Self::apply_action_then),
/// so at most one action is applied at a time and the order in which actions
/// take the lock is the global order of device-state changes.
#[derive(Debug, Default)]
pub struct SharedHome {
    inner: Mutex<Home>,
}

impl SharedHome {
    pub fn new(home: Home) -> Self {
        Self {
            inner: Mutex::new(home),
        }
    }

    /// Applies an action inside the critical section.
    ///
    /// # Errors
    ///
    /// Propagates the [`DeviceError`] from [`Home::apply_action`].
    pub fn apply_action(&self, action: &DeviceAction) -> Result<(), DeviceError> {
        self.apply_action_then(action, |_| {})
    }

    /// Applies an action and, only if it succeeded, runs `on_applied` while
    /// the lock is still held.
    ///
    /// The server uses `on_applied` to queue UPDATE messages to the other
    /// sessions, so peers receive updates in exactly the order the mutations
    /// happened.
    ///
    /// # Errors
    ///
    /// Propagates the [`DeviceError`] from [`Home::apply_action`]; in that
    /// case `on_applied` is not called.
    pub fn apply_action_then<F>(&self, action: &DeviceAction, on_applied: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&DeviceAction),
    {
        let mut home = self.lock();
        home.apply_action(action)?;
        on_applied(action);
        Ok(())
    }

    /// Serializes the current state for an INITIAL message.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.lock().snapshot_bytes()
    }

    /// Serializes the current state and runs `under_lock` before any other
    /// action can be applied.
    pub fn snapshot_bytes_then<F: FnOnce()>(&self, under_lock: F) -> Vec<u8> {
        let home = self.lock();
        let bytes = home.snapshot_bytes();
        under_lock();
        bytes
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> Home {
        self.lock().clone()
    }

    pub fn device_count(&self) -> usize {
        self.lock().device_count()
    }

    fn lock(&self) -> MutexGuard<'_, Home> {
        // A panic while holding the lock cannot leave a device half-updated:
        // `Device::apply` validates before it writes.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
