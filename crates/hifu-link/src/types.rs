//! Shared value types for plan, command and status transfer

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One axis value of a sonication spot
pub type Coordinate = f64;

/// Spots grouped by treatment layer, in execution order within each layer
pub type GroupedSpotMap = BTreeMap<GroupKey, Vec<Spot3D>>;

/// Execution order of the spots within each layer
pub type SpotOrder = BTreeMap<GroupKey, Vec<i32>>;

/// Loosely structured progress report sent by the workstation
pub type StatusSnapshot = BTreeMap<String, StatusValue>;

/// Controller limits for the sonication parameters
pub mod limits {
    pub const VOLT_MAX: f64 = 18.0;
    pub const TOTAL_TIME: (i32, i32) = (6, 20);
    pub const PERIOD: (i32, i32) = (1, 1000);
    pub const DUTY_CYCLE: (i32, i32) = (1, 100);
    pub const COOLING_TIME: (i32, i32) = (1, 500);
}

/// Identifier of a treatment layer (z-plane)
///
/// The key is a float on the wire. Equality, ordering and hashing all work on
/// the exact bit pattern, so a key read back from the wire always matches the
/// key it was written from. `-0.0` and `0.0` are distinct keys.
#[derive(Debug, Clone, Copy)]
pub struct GroupKey(f32);

impl GroupKey {
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl From<f32> for GroupKey {
    fn from(value: f32) -> Self {
        Self(value)
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single sonication target point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spot3D {
    pub x: Coordinate,
    pub y: Coordinate,
    pub z: Coordinate,
}

impl Spot3D {
    pub fn new(x: Coordinate, y: Coordinate, z: Coordinate) -> Self {
        Self { x, y, z }
    }
}

/// Energy profile shared by every spot of a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SonicationParameter {
    /// Driving voltage
    pub volt: f64,
    /// Sonication time per spot, in seconds
    pub total_time: i32,
    /// Sonication period, in milliseconds
    pub period: i32,
    /// Duty cycle, in percent
    pub duty_cycle: i32,
    /// Cooling time between spots, in seconds
    pub cooling_time: i32,
}

impl Default for SonicationParameter {
    fn default() -> Self {
        Self {
            volt: 14.0,
            total_time: 15,
            period: 500,
            duty_cycle: 100,
            cooling_time: 300,
        }
    }
}

impl SonicationParameter {
    /// All-zero parameters, the state of a receiver that holds no plan
    pub fn zeroed() -> Self {
        Self {
            volt: 0.0,
            total_time: 0,
            period: 0,
            duty_cycle: 0,
            cooling_time: 0,
        }
    }

    /// Check the parameters against the controller limits
    pub fn validate(&self) -> Result<(), String> {
        if !(self.volt > 0.0 && self.volt <= limits::VOLT_MAX) {
            return Err(format!(
                "Voltage {} outside (0, {}]",
                self.volt,
                limits::VOLT_MAX
            ));
        }

        let checks = [
            ("Total time", self.total_time, limits::TOTAL_TIME),
            ("Period", self.period, limits::PERIOD),
            ("Duty cycle", self.duty_cycle, limits::DUTY_CYCLE),
            ("Cooling time", self.cooling_time, limits::COOLING_TIME),
        ];
        for (name, value, (low, high)) in checks {
            if !(low..=high).contains(&value) {
                return Err(format!("{name} {value} outside [{low}, {high}]"));
            }
        }

        Ok(())
    }
}

/// A complete treatment plan
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub spots: GroupedSpotMap,
    pub spot_order: SpotOrder,
    pub parameter: SonicationParameter,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            spots: GroupedSpotMap::new(),
            spot_order: SpotOrder::new(),
            parameter: SonicationParameter::zeroed(),
        }
    }
}

impl Plan {
    pub fn new(spots: GroupedSpotMap, spot_order: SpotOrder, parameter: SonicationParameter) -> Self {
        Self {
            spots,
            spot_order,
            parameter,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spots.values().all(Vec::is_empty)
    }

    /// Total number of spots over all layers
    pub fn spot_count(&self) -> usize {
        self.spots.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.spots.clear();
        self.spot_order.clear();
        self.parameter = SonicationParameter::zeroed();
    }

    /// Layers whose spot order does not have one entry per spot
    ///
    /// The protocol does not enforce this; hosts decide what to do about it.
    pub fn spot_order_mismatches(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self
            .spots
            .iter()
            .filter(|(key, spots)| {
                self.spot_order.get(key).map_or(0, Vec::len) != spots.len()
            })
            .map(|(key, _)| *key)
            .collect();

        keys.extend(
            self.spot_order
                .keys()
                .filter(|key| !self.spots.contains_key(key))
                .copied(),
        );
        keys.sort();
        keys
    }
}

/// Dynamically typed value of a status report
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StatusValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for StatusValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for StatusValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Position of the controller within a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionProgress {
    pub spot_index: i32,
    pub period_index: i32,
}

impl From<SessionProgress> for StatusSnapshot {
    fn from(progress: SessionProgress) -> Self {
        let mut status = StatusSnapshot::new();
        status.insert("spotIndex".to_string(), progress.spot_index.into());
        status.insert("periodIndex".to_string(), progress.period_index.into());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_bit_exact() {
        let a = GroupKey::new(1.0);
        let b = GroupKey::new(0.5 + 0.5);
        assert_eq!(a, b);
        assert_ne!(GroupKey::new(0.0), GroupKey::new(-0.0));
        assert!(GroupKey::new(1.0) < GroupKey::new(2.0));

        let mut map = GroupedSpotMap::new();
        map.insert(GroupKey::new(f32::NAN), vec![Spot3D::default()]);
        assert!(map.contains_key(&GroupKey::new(f32::NAN)));
    }

    #[test]
    fn test_parameter_validation() {
        assert!(SonicationParameter::default().validate().is_ok());

        let mut parameter = SonicationParameter::default();
        parameter.duty_cycle = 101;
        assert!(parameter.validate().is_err());

        parameter = SonicationParameter::default();
        parameter.volt = 18.5;
        assert!(parameter.validate().is_err());

        parameter = SonicationParameter::default();
        parameter.total_time = 5;
        let message = parameter.validate().unwrap_err();
        assert!(message.contains("Total time"));
    }

    #[test]
    fn test_plan_counts() {
        let mut plan = Plan::default();
        assert!(plan.is_empty());

        plan.spots.insert(
            GroupKey::new(1.0),
            vec![Spot3D::new(0.0, 0.0, 0.0), Spot3D::new(1.0, 1.0, 1.0)],
        );
        plan.spots.insert(GroupKey::new(2.0), vec![Spot3D::new(2.0, 2.0, 2.0)]);
        assert_eq!(plan.spot_count(), 3);

        plan.clear();
        assert!(plan.is_empty());
        assert_eq!(plan.parameter, SonicationParameter::zeroed());
    }

    #[test]
    fn test_spot_order_mismatches() {
        let mut plan = Plan::default();
        plan.spots.insert(GroupKey::new(1.0), vec![Spot3D::default(); 2]);
        plan.spots.insert(GroupKey::new(2.0), vec![Spot3D::default()]);
        plan.spot_order.insert(GroupKey::new(1.0), vec![0, 1]);
        plan.spot_order.insert(GroupKey::new(3.0), vec![0]);

        assert_eq!(
            plan.spot_order_mismatches(),
            vec![GroupKey::new(2.0), GroupKey::new(3.0)]
        );
    }

    #[test]
    fn test_session_progress_snapshot() {
        let status: StatusSnapshot = SessionProgress {
            spot_index: 4,
            period_index: 2,
        }
        .into();
        assert_eq!(status.get("spotIndex"), Some(&StatusValue::Int(4)));
        assert_eq!(status.get("periodIndex"), Some(&StatusValue::Int(2)));
    }
}
