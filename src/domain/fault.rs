use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumIter, EnumString};

/// Fault codes raised by the fault monitor.
///
/// Declaration order is the emission order: a `FaultSet` iterates (and
/// serializes) its members in this order regardless of detection order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCode {
    /// Any cell above the overvoltage threshold
    Overvoltage,
    /// Any cell below the undervoltage threshold
    Undervoltage,
    /// Any cell above the overtemperature threshold
    Overtemp,
    /// Measured current magnitude above the spike threshold
    ShortCircuit,
}

/// Immutable set of active faults, recomputed every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultSet(BTreeSet<FaultCode>);

impl FaultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, code: FaultCode) -> bool {
        self.0.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = FaultCode> + '_ {
        self.0.iter().copied()
    }

    /// Faults present in `self` but not in `previous`, in emission order.
    ///
    /// Used by the logging boundary to report each fault once when it appears.
    pub fn newly_raised(&self, previous: &FaultSet) -> Vec<FaultCode> {
        self.0.difference(&previous.0).copied().collect()
    }
}

impl FromIterator<FaultCode> for FaultSet {
    fn from_iter<I: IntoIterator<Item = FaultCode>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for FaultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", names.join(", "))
    }
}
