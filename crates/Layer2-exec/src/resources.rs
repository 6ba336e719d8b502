//! Resources and admission bookkeeping
//!
//! [`Resources`] maps a resource name to a quantity. The executor declares
//! its total capacity with one, and every exec requests a share with another.
//! [`Capacity`] tracks what has been handed out.

use dockyard_foundation::{ContentId, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// CPU cores
pub const CPU: &str = "cpu";
/// Memory in bytes
pub const MEM: &str = "mem";
/// Disk in bytes
pub const DISK: &str = "disk";

/// Named resource quantities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, f64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.set(name, amount);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, amount: f64) {
        self.0.insert(name.into(), amount);
    }

    /// Quantity of `name`; undeclared resources are zero
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == 0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Every quantity in `self` is available in `other`
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.iter().all(|(name, amount)| amount <= other.get(name))
    }

    pub fn add(&mut self, other: &Resources) {
        for (name, amount) in other.iter() {
            *self.0.entry(name.to_string()).or_insert(0.0) += amount;
        }
    }

    /// Subtract, saturating at zero
    pub fn sub(&mut self, other: &Resources) {
        for (name, amount) in other.iter() {
            let slot = self.0.entry(name.to_string()).or_insert(0.0);
            *slot = (*slot - amount).max(0.0);
        }
    }
}

impl From<BTreeMap<String, f64>> for Resources {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, amount)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", name, amount)?;
        }
        write!(f, "}}")
    }
}

/// Capacity handed out to execs, keyed by exec id.
///
/// Admission is strict: a request that does not fit in what is left is
/// rejected. Reservations are released exactly once.
#[derive(Debug, Default)]
pub struct Capacity {
    total: Resources,
    reserved: HashMap<ContentId, Resources>,
}

impl Capacity {
    pub fn new(total: Resources) -> Self {
        Self {
            total,
            reserved: HashMap::new(),
        }
    }

    pub fn total(&self) -> &Resources {
        &self.total
    }

    /// Adopt a new total, keeping reservations
    pub fn set_total(&mut self, total: Resources) {
        self.total = total;
    }

    /// What is left after all reservations
    pub fn available(&self) -> Resources {
        let mut available = self.total.clone();
        for reserved in self.reserved.values() {
            available.sub(reserved);
        }
        available
    }

    /// Reserve `request` for `id`. Reserving twice for the same id is a no-op.
    pub fn reserve(&mut self, id: ContentId, request: &Resources) -> Result<()> {
        if self.reserved.contains_key(&id) {
            return Ok(());
        }
        let invalid = request
            .iter()
            .find(|(_, amount)| amount.is_nan() || *amount < 0.0);
        if let Some((name, amount)) = invalid {
            return Err(Error::InvalidInput(format!(
                "resource {} requested with invalid quantity {}",
                name, amount
            )));
        }
        let available = self.available();
        if !request.fits_within(&available) {
            return Err(Error::resource_exhausted(request, available));
        }
        self.reserved.insert(id, request.clone());
        Ok(())
    }

    /// Reserve without checking; used when restoring execs that were
    /// admitted before a restart.
    pub fn reserve_unchecked(&mut self, id: ContentId, request: &Resources) {
        self.reserved.entry(id).or_insert_with(|| request.clone());
    }

    /// Returns whether anything was released
    pub fn release(&mut self, id: &ContentId) -> bool {
        self.reserved.remove(id).is_some()
    }

    pub fn is_reserved(&self, id: &ContentId) -> bool {
        self.reserved.contains_key(id)
    }

    /// Drop all reservations and adopt a new total
    pub fn reset(&mut self, total: Resources) {
        self.total = total;
        self.reserved.clear();
    }
}
