//! Resource kinds, fixed-point amounts and resource bags
//!
//! Amounts are stored in thousandths of a unit so that capacity checks are exact
//! integer comparisons. Each kind carries its own arithmetic domain: execution
//! slots and memory are whole units, energy is a percentage in `[0, 100]`, and
//! chassis-specific kinds are non-negative reals.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{HypervisorError, Result};

const MILLIS_PER_UNIT: u64 = 1000;

/// Upper bound of the energy domain, in percent
pub const ENERGY_CEILING: u64 = 100;

/// Arithmetic domain of a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDomain {
    /// Non-negative whole units
    Integer,
    /// Real number in `[0, max]`
    Bounded { max: Amount },
    /// Non-negative real number
    Real,
}

/// Kind of resource a chassis exposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKind {
    /// Execution slots (ribosomes), shared by the scheduler
    ExecutionSlots,
    /// Energy budget (ATP), in percent
    Energy,
    /// Working memory
    Memory,
    /// Chassis-specific extension
    Custom(String),
}

impl ResourceKind {
    pub fn domain(&self) -> ResourceDomain {
        match self {
            ResourceKind::ExecutionSlots | ResourceKind::Memory => ResourceDomain::Integer,
            ResourceKind::Energy => ResourceDomain::Bounded {
                max: Amount::from_units(ENERGY_CEILING),
            },
            ResourceKind::Custom(_) => ResourceDomain::Real,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::ExecutionSlots => "slots",
            ResourceKind::Energy => "energy",
            ResourceKind::Memory => "memory",
            ResourceKind::Custom(name) => name,
        }
    }

    /// Converts a raw amount into this kind's domain, rejecting values outside it.
    pub fn validate_amount(&self, units: f64) -> Result<Amount> {
        let amount = Amount::from_f64(units).ok_or_else(|| {
            HypervisorError::invalid_request(format!(
                "{self} amount must be a finite non-negative number, got {units}"
            ))
        })?;

        match self.domain() {
            ResourceDomain::Integer if !amount.is_whole() => Err(HypervisorError::invalid_request(
                format!("{self} amount must be a whole number, got {units}"),
            )),
            ResourceDomain::Bounded { max } if amount > max => {
                Err(HypervisorError::invalid_request(format!(
                    "{self} amount must not exceed {max}, got {units}"
                )))
            }
            _ => Ok(amount),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "slots" | "execution_slots" | "ribosomes" => Ok(ResourceKind::ExecutionSlots),
            "energy" | "atp" => Ok(ResourceKind::Energy),
            "memory" | "mem" => Ok(ResourceKind::Memory),
            "" => Err(HypervisorError::invalid_request(
                "resource kind name must not be empty",
            )),
            _ if name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                Ok(ResourceKind::Custom(name))
            }
            _ => Err(HypervisorError::invalid_request(format!(
                "invalid resource kind name: {s}"
            ))),
        }
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = HypervisorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Fixed-point resource amount with a resolution of 1/1000 unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Self {
        Amount(units.saturating_mul(MILLIS_PER_UNIT))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Amount(millis)
    }

    /// Rounds to the nearest thousandth; `None` for negative or non-finite input.
    pub fn from_f64(units: f64) -> Option<Self> {
        if !units.is_finite() || units < 0.0 {
            return None;
        }
        let millis = (units * MILLIS_PER_UNIT as f64).round();
        if millis > u64::MAX as f64 {
            return None;
        }
        Some(Amount(millis as u64))
    }

    pub const fn millis(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MILLIS_PER_UNIT as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_whole(self) -> bool {
        self.0 % MILLIS_PER_UNIT == 0
    }

    /// Number of whole units contained in this amount.
    pub const fn whole_units(self) -> u64 {
        self.0 / MILLIS_PER_UNIT
    }

    pub const fn floor_units(self) -> Self {
        Amount(self.0 - self.0 % MILLIS_PER_UNIT)
    }

    pub fn checked_add(self, other: Amount) -> Option<Self> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Self {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Scales by `factor`, rounding to the nearest thousandth.
    pub fn scale(self, factor: f64) -> Self {
        Amount((self.0 as f64 * factor).round().max(0.0) as u64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MILLIS_PER_UNIT;
        let frac = self.0 % MILLIS_PER_UNIT;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let frac = format!("{frac:03}");
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl TryFrom<f64> for Amount {
    type Error = HypervisorError;

    fn try_from(units: f64) -> Result<Self> {
        Amount::from_f64(units).ok_or_else(|| {
            HypervisorError::invalid_request(format!(
                "amount must be a finite non-negative number, got {units}"
            ))
        })
    }
}

impl From<Amount> for f64 {
    fn from(amount: Amount) -> Self {
        amount.as_f64()
    }
}

/// Amount per resource kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceBag(BTreeMap<ResourceKind, Amount>);

impl ResourceBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw `kind -> amount` map, validating every kind and amount.
    ///
    /// Two names that alias the same kind (e.g. `slots` and `ribosomes`) are
    /// rejected rather than summed.
    pub fn from_raw(raw: &BTreeMap<String, f64>) -> Result<Self> {
        let mut bag = ResourceBag::new();
        for (name, units) in raw {
            let kind: ResourceKind = name.parse()?;
            let amount = kind.validate_amount(*units)?;
            if bag.0.insert(kind.clone(), amount).is_some() {
                return Err(HypervisorError::invalid_request(format!(
                    "resource kind {kind} specified more than once"
                )));
            }
        }
        Ok(bag)
    }

    pub fn to_raw(&self) -> BTreeMap<String, f64> {
        self.0
            .iter()
            .map(|(kind, amount)| (kind.to_string(), amount.as_f64()))
            .collect()
    }

    pub fn with(mut self, kind: ResourceKind, amount: Amount) -> Self {
        self.0.insert(kind, amount);
        self
    }

    pub fn insert(&mut self, kind: ResourceKind, amount: Amount) -> Option<Amount> {
        self.0.insert(kind, amount)
    }

    /// Amount held of `kind`, zero when absent.
    pub fn get(&self, kind: &ResourceKind) -> Amount {
        self.0.get(kind).copied().unwrap_or(Amount::ZERO)
    }

    pub fn contains(&self, kind: &ResourceKind) -> bool {
        self.0.contains_key(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKind, &Amount)> {
        self.0.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ResourceKind> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ResourceKind, Amount)> for ResourceBag {
    fn from_iter<T: IntoIterator<Item = (ResourceKind, Amount)>>(iter: T) -> Self {
        ResourceBag(iter.into_iter().collect())
    }
}

/// Resources committed by a ledger to one VM
///
/// Only a [`Ledger`](super::ledger::Ledger) creates grants, and releasing one
/// consumes it, so a grant cannot be returned twice.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceGrant {
    chassis: String,
    amounts: ResourceBag,
}

impl ResourceGrant {
    pub(crate) fn new(chassis: impl Into<String>, amounts: ResourceBag) -> Self {
        Self {
            chassis: chassis.into(),
            amounts,
        }
    }

    pub fn chassis(&self) -> &str {
        &self.chassis
    }

    pub fn amounts(&self) -> &ResourceBag {
        &self.amounts
    }

    pub(crate) fn into_amounts(self) -> ResourceBag {
        self.amounts
    }
}
