use super::{LaneChangeParams, ModelParams};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a simulated vehicle, which determines how it drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VehicleClass {
    #[default]
    Car,
    Taxi,
    Bus,
    Truck,
    Tram,
    Emergency,
}

/// Name fragments identifying each class, checked in order.
const NAME_PATTERNS: &[(&[&str], VehicleClass)] = &[
    (
        &["ambulance", "police", "fire", "emergency"],
        VehicleClass::Emergency,
    ),
    (&["taxi"], VehicleClass::Taxi),
    (&["tram", "streetcar", "trolley"], VehicleClass::Tram),
    (&["bus", "coach"], VehicleClass::Bus),
    (&["truck", "lorry", "van"], VehicleClass::Truck),
];

impl VehicleClass {
    pub const ALL: [VehicleClass; 6] = [
        VehicleClass::Car,
        VehicleClass::Taxi,
        VehicleClass::Bus,
        VehicleClass::Truck,
        VehicleClass::Tram,
        VehicleClass::Emergency,
    ];

    /// Picks the class of a vehicle from its model name, defaulting to [VehicleClass::Car].
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        NAME_PATTERNS
            .iter()
            .find(|(patterns, _)| patterns.iter().any(|p| name.contains(p)))
            .map(|(_, class)| *class)
            .unwrap_or_default()
    }

    /// The car-following parameters of the class.
    pub fn model_params(self) -> ModelParams {
        use VehicleClass::*;
        // (v0, T, s0, a, b, bmax)
        let (v0, t, s0, a, b, bmax) = match self {
            Car => (12.0, 1.2, 2.0, 2.0, 3.0, 9.0),
            Taxi => (13.0, 1.0, 2.0, 2.2, 3.0, 9.0),
            Bus => (9.0, 1.8, 3.0, 1.2, 2.0, 7.0),
            Truck => (8.0, 2.0, 3.5, 1.0, 2.0, 7.0),
            Tram => (8.0, 1.6, 3.0, 1.0, 2.2, 6.0),
            Emergency => (18.0, 0.8, 1.5, 3.0, 4.5, 12.0),
        };
        ModelParams {
            desired_speed: v0,
            time_headway: t,
            min_gap: s0,
            max_acceleration: a,
            comf_deceleration: b,
            max_deceleration: bmax,
        }
    }

    /// The lane changing parameters of the class.
    pub fn lane_change_params(self) -> LaneChangeParams {
        use VehicleClass::*;
        // (politeness, threshold, bias right, bSafe, bSafeMax)
        let (p, thr, bias, safe, safe_max) = match self {
            Car => (0.2, 0.3, 0.1, 4.0, 9.0),
            Taxi => (0.1, 0.2, 0.2, 4.0, 9.0),
            Bus => (0.3, 0.4, 0.3, 3.0, 6.0),
            Truck => (0.3, 0.4, 0.3, 3.0, 6.0),
            // Rails: the incentive can never be met
            Tram => (0.5, 1000.0, 0.0, 2.0, 4.0),
            Emergency => (0.05, 0.1, -2.0, 6.0, 12.0),
        };
        LaneChangeParams {
            politeness: p,
            threshold: thr,
            bias_right: bias,
            safe_deceleration: safe,
            safe_deceleration_max: safe_max,
        }
    }

    /// The body length in units.
    pub fn length(self) -> f64 {
        match self {
            VehicleClass::Car | VehicleClass::Taxi => 4.5,
            VehicleClass::Bus => 11.0,
            VehicleClass::Truck => 8.0,
            VehicleClass::Tram => 14.0,
            VehicleClass::Emergency => 5.5,
        }
    }

    /// The body width in units.
    pub fn width(self) -> f64 {
        match self {
            VehicleClass::Car | VehicleClass::Taxi | VehicleClass::Emergency => 2.0,
            VehicleClass::Bus | VehicleClass::Truck | VehicleClass::Tram => 2.5,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehicleClass::Car => "car",
            VehicleClass::Taxi => "taxi",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
            VehicleClass::Tram => "tram",
            VehicleClass::Emergency => "emergency",
        };
        f.write_str(name)
    }
}
