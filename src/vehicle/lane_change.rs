//! Lane change decisions using the MOBIL model
//! ("minimizing overall braking induced by lane changes").

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Decides whether a vehicle should move into an adjacent lane.
pub trait LaneChangeStrategy {
    /// Decides whether to change lanes.
    ///
    /// # Parameters
    /// * `velocity_ratio` - The vehicle's velocity divided by its desired speed
    /// * `acc` - The vehicle's acceleration in its current lane
    /// * `acc_new` - The vehicle's prospective acceleration in the new lane
    /// * `acc_lag_new` - The prospective acceleration of the vehicle that
    ///   would follow it in the new lane
    /// * `to_right` - Whether the new lane is to the right
    fn should_change_lane(
        &self,
        velocity_ratio: f64,
        acc: f64,
        acc_new: f64,
        acc_lag_new: f64,
        to_right: bool,
    ) -> bool;
}

/// The parameters of the [Mobil] model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneChangeParams {
    /// How much the driver weighs the new follower's disadvantage, usually 0 to 1.
    pub politeness: f64,
    /// The acceleration gain needed before changing lanes, in units/s<sup>2</sup>.
    pub threshold: f64,
    /// A bias towards the right lane, in units/s<sup>2</sup>. Negative values favour the left.
    pub bias_right: f64,
    /// The safe deceleration imposed on the new follower at high speed.
    pub safe_deceleration: f64,
    /// The safe deceleration imposed on the new follower when stopped.
    pub safe_deceleration_max: f64,
}

/// The MOBIL lane changing model.
#[derive(Clone, Debug)]
pub struct Mobil {
    params: LaneChangeParams,
}

impl Mobil {
    pub fn new(params: LaneChangeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LaneChangeParams {
        &self.params
    }

    /// The deceleration the new follower may be forced into, which shrinks with speed.
    fn safe_deceleration(&self, velocity_ratio: f64) -> f64 {
        let r = velocity_ratio.clamp(0.0, 1.0);
        r * self.params.safe_deceleration + (1.0 - r) * self.params.safe_deceleration_max
    }
}

impl LaneChangeStrategy for Mobil {
    fn should_change_lane(
        &self,
        velocity_ratio: f64,
        acc: f64,
        acc_new: f64,
        acc_lag_new: f64,
        to_right: bool,
    ) -> bool {
        let p = &self.params;

        // A large bias relaxes the safety criterion, allowing forced merges.
        let safe_limit = f64::min(-self.safe_deceleration(velocity_ratio), -p.bias_right.abs());
        if acc_lag_new < safe_limit {
            return false;
        }

        let sign = if to_right { 1.0 } else { -1.0 };
        let gain = acc_new - acc + p.politeness * acc_lag_new;
        let incentive = gain + p.bias_right * sign - p.threshold;
        incentive > 0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::VehicleClass;

    fn car() -> Mobil {
        Mobil::new(VehicleClass::Car.lane_change_params())
    }

    #[test]
    fn changes_when_new_lane_is_better() {
        assert!(car().should_change_lane(0.5, -1.0, 1.0, 0.0, false));
        assert!(!car().should_change_lane(0.5, 1.0, 1.0, 0.0, false));
    }

    #[test]
    fn never_cuts_off_the_new_follower() {
        let mobil = car();
        let limit = mobil.safe_deceleration(1.0);
        assert!(!mobil.should_change_lane(1.0, -3.0, 2.0, -limit - 0.1, true));
        // The same braking is tolerated at low speed.
        assert!(mobil.should_change_lane(0.0, -3.0, 2.0, -limit - 0.1, true));
    }

    #[test]
    fn strong_bias_forces_or_forbids() {
        let must_merge = Mobil::new(LaneChangeParams {
            bias_right: 50.0,
            ..VehicleClass::Car.lane_change_params()
        });
        assert!(must_merge.should_change_lane(1.0, 1.0, -2.0, -20.0, true));
        assert!(!must_merge.should_change_lane(1.0, -5.0, 5.0, 0.0, false));
    }

    #[test]
    fn emergency_vehicles_prefer_the_fast_lane() {
        let mobil = Mobil::new(VehicleClass::Emergency.lane_change_params());
        assert!(mobil.params().politeness < 0.1);
        assert!(mobil.should_change_lane(0.8, 0.0, 0.0, -1.0, false));
        assert!(!mobil.should_change_lane(0.8, 0.0, 0.0, 0.0, true));
    }
}
