//! Longitudinal car-following models.
//!
//! Both models take the bumper-to-bumper `gap` to the limiting obstruction,
//! the vehicle's own velocity, and the obstruction's velocity and acceleration.
//! A very large gap means there is no obstruction.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The speed cap applied when no speed limit has been set, in units/s.
const UNLIMITED_SPEED: f64 = 1000.0;

/// The default coolness factor of the [Acc] model.
pub const DEFAULT_COOLNESS: f64 = 0.99;

/// The parameters of the car-following models.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelParams {
    /// The desired speed on an empty road (v0), in units/s.
    pub desired_speed: f64,
    /// The desired time gap to the vehicle ahead (T), in s.
    pub time_headway: f64,
    /// The minimum gap to keep when stopped (s0), in units.
    pub min_gap: f64,
    /// The maximum acceleration (a), in units/s<sup>2</sup>.
    pub max_acceleration: f64,
    /// The comfortable deceleration (b), a positive number in units/s<sup>2</sup>.
    pub comf_deceleration: f64,
    /// The maximum deceleration (bmax), a positive number in units/s<sup>2</sup>.
    pub max_deceleration: f64,
}

/// Which car-following model new vehicles use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModelKind {
    Idm,
    #[default]
    Acc,
}

/// The intelligent driver model.
#[derive(Debug)]
pub struct Idm {
    params: ModelParams,
    speed_limit: f64,
    speed_max: f64,
    driver_factor: f64,
}

/// The adaptive cruise control model: the IDM blended with a
/// constant-acceleration heuristic, which brakes less abruptly.
#[derive(Debug)]
pub struct Acc {
    idm: Idm,
    coolness: f64,
}

/// A car-following model owned by a single vehicle.
#[derive(Debug)]
pub enum DynamicsModel {
    Idm(Idm),
    Acc(Acc),
}

impl Idm {
    /// Creates a new model with no speed limit.
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            speed_limit: UNLIMITED_SPEED,
            speed_max: UNLIMITED_SPEED,
            driver_factor: 1.0,
        }
    }

    /// The model's parameters.
    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Sets the speed limit of the road the vehicle is on.
    pub fn set_speed_limit(&mut self, speed_limit: f64) {
        self.speed_limit = speed_limit;
    }

    /// Sets the maximum speed the vehicle is capable of.
    pub fn set_speed_max(&mut self, speed_max: f64) {
        self.speed_max = speed_max;
    }

    /// Sets the factor by which this driver deviates from the desired speed.
    pub fn set_driver_factor(&mut self, factor: f64) {
        self.driver_factor = factor;
    }

    /// The speed the driver is trying to reach.
    pub fn desired_speed(&self) -> f64 {
        let v0 = self
            .params
            .desired_speed
            .min(self.speed_limit)
            .min(self.speed_max);
        f64::max(v0, 0.01) * self.driver_factor
    }

    /// The acceleration on an empty road.
    pub fn free_road(&self, vel: f64) -> f64 {
        let a = self.params.max_acceleration;
        let v0 = self.desired_speed();
        if vel < v0 {
            a * (1.0 - (vel / v0).powi(4))
        } else {
            a * (1.0 - vel / v0)
        }
    }

    /// The braking term due to the obstruction.
    fn interaction(&self, gap: f64, vel: f64, leader_vel: f64) -> f64 {
        let p = &self.params;
        let dynamic = vel * p.time_headway
            + vel * (vel - leader_vel) / (2.0 * (p.max_acceleration * p.comf_deceleration).sqrt());
        let s_star = p.min_gap + f64::max(0.0, dynamic);
        -p.max_acceleration * (s_star / f64::max(gap, p.min_gap)).powi(2)
    }

    /// Computes the acceleration of the vehicle.
    pub fn calc_acceleration(&self, gap: f64, vel: f64, leader_vel: f64, _leader_acc: f64) -> f64 {
        let acc = self.free_road(vel) + self.interaction(gap.max(0.0), vel, leader_vel);
        f64::max(acc, -self.params.max_deceleration)
    }
}

impl Acc {
    /// Creates a new model with the default coolness.
    pub fn new(params: ModelParams) -> Self {
        Self::with_coolness(params, DEFAULT_COOLNESS)
    }

    /// Creates a new model. A coolness of 0 behaves like the IDM.
    pub fn with_coolness(params: ModelParams, coolness: f64) -> Self {
        Self {
            idm: Idm::new(params),
            coolness: coolness.clamp(0.0, 1.0),
        }
    }

    /// Computes the acceleration of the vehicle.
    pub fn calc_acceleration(&self, gap: f64, vel: f64, leader_vel: f64, leader_acc: f64) -> f64 {
        let p = &self.idm.params;
        let gap = gap.max(0.0);
        if gap < p.min_gap {
            return -p.max_deceleration;
        }

        let free = self.idm.free_road(vel);
        let acc_idm = free + self.idm.interaction(gap, vel, leader_vel);
        let closing = vel * f64::max(vel - leader_vel, 0.0) / (2.0 * f64::max(gap, 0.01));
        let acc_cah = free + f64::min(leader_acc, 0.0) - closing;

        let b = p.comf_deceleration;
        let mix = if acc_idm > acc_cah {
            acc_idm
        } else {
            acc_cah + b * ((acc_idm - acc_cah) / b).tanh()
        };
        let acc = self.coolness * mix + (1.0 - self.coolness) * acc_idm;
        f64::max(acc, -p.max_deceleration)
    }
}

impl DynamicsModel {
    /// Creates a new model of the given kind.
    pub fn new(kind: ModelKind, params: ModelParams) -> Self {
        match kind {
            ModelKind::Idm => DynamicsModel::Idm(Idm::new(params)),
            ModelKind::Acc => DynamicsModel::Acc(Acc::new(params)),
        }
    }

    fn idm(&self) -> &Idm {
        match self {
            DynamicsModel::Idm(idm) => idm,
            DynamicsModel::Acc(acc) => &acc.idm,
        }
    }

    fn idm_mut(&mut self) -> &mut Idm {
        match self {
            DynamicsModel::Idm(idm) => idm,
            DynamicsModel::Acc(acc) => &mut acc.idm,
        }
    }

    /// The model's parameters.
    pub fn params(&self) -> &ModelParams {
        self.idm().params()
    }

    /// Sets the speed limit of the road the vehicle is on.
    pub fn set_speed_limit(&mut self, speed_limit: f64) {
        self.idm_mut().set_speed_limit(speed_limit);
    }

    /// Sets the factor by which this driver deviates from the desired speed.
    pub fn set_driver_factor(&mut self, factor: f64) {
        self.idm_mut().set_driver_factor(factor);
    }

    /// The speed the driver is trying to reach.
    pub fn desired_speed(&self) -> f64 {
        self.idm().desired_speed()
    }

    /// Computes the acceleration of the vehicle.
    pub fn calc_acceleration(&self, gap: f64, vel: f64, leader_vel: f64, leader_acc: f64) -> f64 {
        match self {
            DynamicsModel::Idm(idm) => idm.calc_acceleration(gap, vel, leader_vel, leader_acc),
            DynamicsModel::Acc(acc) => acc.calc_acceleration(gap, vel, leader_vel, leader_acc),
        }
    }
}
