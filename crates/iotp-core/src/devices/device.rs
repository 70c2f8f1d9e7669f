//! The closed set of device kinds and their per-kind behaviour.
//!
//! Every kind is described by a static [`DeviceKind`] entry: its state names,
//! its parameter slots and its legal operations.  A [`Device`] is a plain
//! value tagged with its [`DeviceType`]; applying an opcode looks the
//! operation up in the kind's table and checks it against the current state.
//!
//! | Kind   | States           | Params           | Opcodes                                      |
//! |--------|------------------|------------------|----------------------------------------------|
//! | light  | OFF ON           | dim level        | TURN_ON TURN_OFF DIM                         |
//! | blind  | UP DOWN          | dim level        | PUT_DOWN PULL_UP DIM                         |
//! | thermo | OFF ON           | temperature      | TURN_ON TURN_OFF SET_TEMP                    |
//! | tv     | OFF ON           | channel volume   | TURN_ON TURN_OFF SET_CHANNEL SET_VOLUME      |
//! | slock  | OFF ON ARMED     | (none)           | TURN_ON TURN_OFF ARM                         |

use std::fmt;

use thiserror::Error;

/// Reasons a device or the home refuses an action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("unknown device type code {0}")]
    UnknownDeviceType(u8),

    #[error("no {device_type} with index {index}")]
    UnknownDevice { device_type: DeviceType, index: u8 },

    #[error("illegal opcode {opcode} for {device_type}")]
    UnknownOpcode { device_type: DeviceType, opcode: u8 },

    #[error("{operation} expects {expected} parameter(s), given {given}")]
    WrongParameterCount {
        operation: &'static str,
        expected: usize,
        given: usize,
    },

    #[error("{name} is already {state}")]
    AlreadyInState { name: String, state: &'static str },

    #[error("cannot {operation} {name} while it is {state}")]
    InvalidInState {
        operation: &'static str,
        name: String,
        state: &'static str,
    },

    #[error("invalid {device_type} description: {reason}")]
    InvalidDevice {
        device_type: DeviceType,
        reason: String,
    },

    #[error("malformed home snapshot: {0}")]
    MalformedSnapshot(String),
}

// ── Device types ──────────────────────────────────────────────────────────────

/// Device kind; the wire code is the variant's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceType {
    Light,
    Blind,
    Thermo,
    Tv,
    SLock,
}

impl DeviceType {
    /// Every kind in wire-code order.  Snapshots list devices in this order.
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Light,
        DeviceType::Blind,
        DeviceType::Thermo,
        DeviceType::Tv,
        DeviceType::SLock,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns the static behaviour table for this kind.
    pub fn kind(self) -> &'static DeviceKind {
        match self {
            DeviceType::Light => &LIGHT,
            DeviceType::Blind => &BLIND,
            DeviceType::Thermo => &THERMO,
            DeviceType::Tv => &TV,
            DeviceType::SLock => &SLOCK,
        }
    }

    /// Number of parameter bytes every device of this kind carries.
    pub fn param_count(self) -> usize {
        self.kind().params.len()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().label)
    }
}

// ── Dispatch table ────────────────────────────────────────────────────────────

/// What an operation does to the device it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Moves the device into the given state.  Rejected if already there.
    Enter(u8),
    /// Overwrites one parameter slot with the single argument.  Only legal
    /// while the device is in `requires`.
    Adjust { param: usize, requires: u8 },
}

/// One legal opcode of a device kind.
#[derive(Debug)]
pub struct Operation {
    pub opcode: u8,
    pub name: &'static str,
    /// Human-readable names of the arguments, in wire order.
    pub params: &'static [&'static str],
    pub effect: Effect,
}

/// Static description of a device kind.
#[derive(Debug)]
pub struct DeviceKind {
    pub label: &'static str,
    pub states: &'static [&'static str],
    pub params: &'static [&'static str],
    pub operations: &'static [Operation],
}

impl DeviceKind {
    pub fn operation(&self, opcode: u8) -> Option<&'static Operation> {
        self.operations.iter().find(|op| op.opcode == opcode)
    }

    pub fn state_name(&self, state: u8) -> &'static str {
        self.states.get(usize::from(state)).copied().unwrap_or("?")
    }
}

const fn enter(opcode: u8, name: &'static str, state: u8) -> Operation {
    Operation {
        opcode,
        name,
        params: &[],
        effect: Effect::Enter(state),
    }
}

const fn adjust(
    opcode: u8,
    name: &'static str,
    arg: &'static [&'static str],
    param: usize,
    requires: u8,
) -> Operation {
    Operation {
        opcode,
        name,
        params: arg,
        effect: Effect::Adjust { param, requires },
    }
}

const OFF: u8 = 0;
const ON: u8 = 1;
const ARMED: u8 = 2;
const UP: u8 = 0;
const DOWN: u8 = 1;

static LIGHT: DeviceKind = DeviceKind {
    label: "light",
    states: &["OFF", "ON"],
    params: &["dim-level"],
    operations: &[
        enter(0, "Turn ON", ON),
        enter(1, "Turn OFF", OFF),
        adjust(2, "Dim", &["Dim level"], 0, ON),
    ],
};

static BLIND: DeviceKind = DeviceKind {
    label: "blind",
    states: &["UP", "DOWN"],
    params: &["dim-level"],
    operations: &[
        enter(0, "Put down", DOWN),
        enter(1, "Pull up", UP),
        adjust(2, "Dim", &["Dim level"], 0, DOWN),
    ],
};

static THERMO: DeviceKind = DeviceKind {
    label: "thermo",
    states: &["OFF", "ON"],
    params: &["temp"],
    operations: &[
        enter(0, "Turn ON", ON),
        enter(1, "Turn OFF", OFF),
        adjust(2, "Set temperature", &["Temperature"], 0, ON),
    ],
};

static TV: DeviceKind = DeviceKind {
    label: "tv",
    states: &["OFF", "ON"],
    params: &["channel", "volume"],
    operations: &[
        enter(0, "Turn ON", ON),
        enter(1, "Turn OFF", OFF),
        adjust(2, "Set channel", &["Channel"], 0, ON),
        adjust(3, "Set volume", &["Volume"], 1, ON),
    ],
};

static SLOCK: DeviceKind = DeviceKind {
    label: "slock",
    states: &["OFF", "ON", "ARMED"],
    params: &[],
    operations: &[
        enter(0, "Turn ON", ON),
        enter(1, "Turn OFF", OFF),
        enter(2, "Arm", ARMED),
    ],
};

// ── Device ────────────────────────────────────────────────────────────────────

/// Maximum name length carried in a snapshot.
pub const NAME_LEN: usize = 16;

/// A single controllable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    device_type: DeviceType,
    name: String,
    state: u8,
    params: Vec<u8>,
}

impl Device {
    /// Creates a device, validating the state and parameter count against
    /// the kind's table.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidDevice`] if `state` is out of range or
    /// `params` has the wrong length.
    pub fn new(
        device_type: DeviceType,
        name: impl Into<String>,
        state: u8,
        params: Vec<u8>,
    ) -> Result<Self, DeviceError> {
        let kind = device_type.kind();
        if usize::from(state) >= kind.states.len() {
            return Err(DeviceError::InvalidDevice {
                device_type,
                reason: format!("state {state} out of range"),
            });
        }
        if params.len() != kind.params.len() {
            return Err(DeviceError::InvalidDevice {
                device_type,
                reason: format!(
                    "expected {} parameter(s), got {}",
                    kind.params.len(),
                    params.len()
                ),
            });
        }
        Ok(Self {
            device_type,
            name: name.into(),
            state,
            params,
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.device_type.kind().state_name(self.state)
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Applies one opcode with its arguments.
    ///
    /// The device is left untouched when an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] for an illegal opcode, a wrong argument count,
    /// a transition into the current state, or an adjustment made in the
    /// wrong state.
    pub fn apply(&mut self, opcode: u8, args: &[u8]) -> Result<(), DeviceError> {
        let kind = self.device_type.kind();
        let op = kind.operation(opcode).ok_or(DeviceError::UnknownOpcode {
            device_type: self.device_type,
            opcode,
        })?;

        if args.len() != op.params.len() {
            return Err(DeviceError::WrongParameterCount {
                operation: op.name,
                expected: op.params.len(),
                given: args.len(),
            });
        }

        match op.effect {
            Effect::Enter(target) => {
                if self.state == target {
                    return Err(DeviceError::AlreadyInState {
                        name: self.name.clone(),
                        state: kind.state_name(target),
                    });
                }
                self.state = target;
            }
            Effect::Adjust { param, requires } => {
                if self.state != requires {
                    return Err(DeviceError::InvalidInState {
                        operation: op.name,
                        name: self.name.clone(),
                        state: self.state_name(),
                    });
                }
                self.params[param] = args[0];
            }
        }
        Ok(())
    }

    /// Appends this device's snapshot record: padded name, state, params.
    pub(crate) fn write_snapshot(&self, buf: &mut Vec<u8>) {
        let mut name = self.name.as_bytes().to_vec();
        name.truncate(NAME_LEN);
        name.resize(NAME_LEN, b' ');
        buf.extend_from_slice(&name);
        buf.push(self.state);
        buf.extend_from_slice(&self.params);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} {:<10}", self.name, self.state_name())?;
        for (label, value) in self.device_type.kind().params.iter().zip(&self.params) {
            write!(f, " {label}: {value:<4}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(state: u8) -> Device {
        Device::new(DeviceType::Tv, "living tv", state, vec![5, 20]).unwrap()
    }

    #[test]
    fn test_type_codes_follow_declaration_order() {
        for (index, device_type) in DeviceType::ALL.iter().enumerate() {
            assert_eq!(usize::from(device_type.code()), index);
            assert_eq!(DeviceType::from_code(index as u8), Some(*device_type));
        }
        assert_eq!(DeviceType::from_code(5), None);
    }

    #[test]
    fn test_param_counts_per_kind() {
        assert_eq!(DeviceType::Light.param_count(), 1);
        assert_eq!(DeviceType::Blind.param_count(), 1);
        assert_eq!(DeviceType::Thermo.param_count(), 1);
        assert_eq!(DeviceType::Tv.param_count(), 2);
        assert_eq!(DeviceType::SLock.param_count(), 0);
    }

    #[test]
    fn test_new_rejects_out_of_range_state() {
        let result = Device::new(DeviceType::Light, "x", 2, vec![0]);
        assert!(matches!(result, Err(DeviceError::InvalidDevice { .. })));
    }

    #[test]
    fn test_new_rejects_wrong_param_count() {
        let result = Device::new(DeviceType::SLock, "x", 0, vec![1]);
        assert!(matches!(result, Err(DeviceError::InvalidDevice { .. })));
    }

    #[test]
    fn test_turn_on_from_off_succeeds() {
        // Arrange
        let mut device = tv(OFF);

        // Act
        let result = device.apply(0, &[]);

        // Assert
        assert!(result.is_ok());
        assert_eq!(device.state_name(), "ON");
    }

    #[test]
    fn test_entering_current_state_is_rejected() {
        // Arrange
        let mut device = tv(ON);

        // Act
        let result = device.apply(0, &[]);

        // Assert
        assert!(matches!(result, Err(DeviceError::AlreadyInState { .. })));
        assert_eq!(device.state(), ON);
    }

    #[test]
    fn test_set_volume_writes_second_param() {
        // Arrange
        let mut device = tv(ON);

        // Act
        device.apply(3, &[77]).unwrap();

        // Assert
        assert_eq!(device.params(), &[5, 77]);
    }

    #[test]
    fn test_adjust_while_off_is_rejected_and_leaves_params() {
        // Arrange
        let mut device = tv(OFF);

        // Act
        let result = device.apply(2, &[9]);

        // Assert
        assert!(matches!(result, Err(DeviceError::InvalidInState { .. })));
        assert_eq!(device.params(), &[5, 20]);
    }

    #[test]
    fn test_blind_dim_requires_down() {
        let mut blind = Device::new(DeviceType::Blind, "hall blind", UP, vec![0]).unwrap();
        assert!(blind.apply(2, &[50]).is_err());

        blind.apply(0, &[]).unwrap();
        blind.apply(2, &[50]).unwrap();
        assert_eq!(blind.state_name(), "DOWN");
        assert_eq!(blind.params(), &[50]);
    }

    #[test]
    fn test_slock_can_be_armed_from_any_other_state() {
        let mut lock = Device::new(DeviceType::SLock, "front", OFF, vec![]).unwrap();
        lock.apply(2, &[]).unwrap();
        assert_eq!(lock.state_name(), "ARMED");
        assert!(lock.apply(2, &[]).is_err());
        lock.apply(0, &[]).unwrap();
        assert_eq!(lock.state_name(), "ON");
    }

    #[test]
    fn test_wrong_argument_count_is_rejected() {
        let mut device = tv(ON);
        assert!(matches!(
            device.apply(1, &[3]),
            Err(DeviceError::WrongParameterCount {
                expected: 0,
                given: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let mut lock = Device::new(DeviceType::SLock, "front", OFF, vec![]).unwrap();
        assert!(matches!(
            lock.apply(3, &[]),
            Err(DeviceError::UnknownOpcode { opcode: 3, .. })
        ));
    }

    #[test]
    fn test_snapshot_record_pads_and_truncates_name() {
        // Arrange
        let short = Device::new(DeviceType::SLock, "door", ON, vec![]).unwrap();
        let long = Device::new(DeviceType::SLock, "a-very-long-device-name", ON, vec![]).unwrap();

        // Act
        let mut a = Vec::new();
        short.write_snapshot(&mut a);
        let mut b = Vec::new();
        long.write_snapshot(&mut b);

        // Assert
        assert_eq!(a.len(), NAME_LEN + 1);
        assert_eq!(&a[..NAME_LEN], b"door            ");
        assert_eq!(&b[..NAME_LEN], b"a-very-long-devi");
    }
}
