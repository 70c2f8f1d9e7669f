//! Seeded random home generator for demos and tests.
//!
//! The same seed always yields the same home, so a server restarted with the
//! default configuration presents clients with an identical device list.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::devices::device::{Device, DeviceError, DeviceType};
use crate::devices::home::Home;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 4;

/// Upper bound on devices per kind when none is configured.
pub const DEFAULT_MAX_PER_TYPE: u8 = 3;

const ROOMS: [&str; 11] = [
    "bedroom", "kitchen", "bathroom", "dining", "living", "garage", "closet", "hallway",
    "basement", "laundry", "study",
];

/// Generates homes with `1..=max_per_type` devices of every kind.
#[derive(Debug)]
pub struct HomeGenerator {
    rng: StdRng,
    max_per_type: u8,
}

impl HomeGenerator {
    pub fn new(seed: u64, max_per_type: u8) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_per_type: max_per_type.max(1),
        }
    }

    /// Builds a new home, advancing the generator.
    pub fn generate(&mut self) -> Home {
        let mut home = Home::new();
        for device_type in DeviceType::ALL {
            let count = self.rng.gen_range(1..=self.max_per_type);
            for _ in 0..count {
                // State and parameter count come from the kind's own table, and
                // `max_per_type` stays below the per-kind capacity.
                if let Ok(device) = self.random_device(device_type) {
                    let _ = home.add_device(device);
                }
            }
        }
        home
    }

    fn random_device(&mut self, device_type: DeviceType) -> Result<Device, DeviceError> {
        let kind = device_type.kind();
        let room = ROOMS.choose(&mut self.rng).copied().unwrap_or("spare");
        let name = format!("{room} {}", kind.label);
        let state = self.rng.gen_range(0..kind.states.len()) as u8;
        let params: Vec<u8> = kind
            .params
            .iter()
            .map(|param| match *param {
                "temp" => self.rng.gen_range(15..=30),
                "channel" => self.rng.gen_range(1..=99),
                _ => self.rng.gen_range(0..=100),
            })
            .collect();
        Device::new(device_type, name, state, params)
    }
}

impl Default for HomeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED, DEFAULT_MAX_PER_TYPE)
    }
}
