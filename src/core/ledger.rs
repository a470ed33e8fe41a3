//! Resource ledger: fixed capacity, live usage, paired reserve/release.
//!
//! The ledger itself is not synchronized. It lives inside the scheduler
//! state, so every `try_reserve`/`release` runs under the same lock as the
//! task tables and a check-and-reserve can never interleave with another.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::serde::{ResourceKind, ResourceVector};

/// Tolerance for float drift after many reserve/release pairs.
const EPSILON: f64 = 1e-9;

/// Capacity and usage of the abstract resource pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLedger {
    capacity: ResourceVector,
    usage: ResourceVector,
}

impl ResourceLedger {
    /// Ledger with the given capacity and nothing reserved.
    #[must_use]
    pub fn new(capacity: ResourceVector) -> Self {
        let usage = capacity.iter().map(|(kind, _)| (kind, 0.0)).collect();
        Self { capacity, usage }
    }

    /// Capacity of the host: every core, 8 GB of memory, one GPU.
    #[must_use]
    pub fn default_capacity() -> ResourceVector {
        #[allow(clippy::cast_precision_loss)]
        let cores = num_cpus::get().max(1) as f64;
        ResourceVector::new()
            .with(ResourceKind::Cpu, cores)
            .with(ResourceKind::Memory, 8192.0)
            .with(ResourceKind::Gpu, 1.0)
    }

    /// Total capacity.
    #[must_use]
    pub const fn capacity(&self) -> &ResourceVector {
        &self.capacity
    }

    /// Currently reserved amounts.
    #[must_use]
    pub const fn usage(&self) -> &ResourceVector {
        &self.usage
    }

    /// Whether `requirement` could ever be satisfied, i.e. fits into an
    /// empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ExceedsCapacity`] naming the first resource
    /// that does not fit.
    pub fn check_fits_capacity(&self, requirement: &ResourceVector) -> Result<(), SchedulerError> {
        for (resource, requested) in requirement.iter() {
            let capacity = self.capacity.get(resource);
            if requested > capacity + EPSILON {
                return Err(SchedulerError::ExceedsCapacity {
                    resource,
                    requested,
                    capacity,
                });
            }
        }
        Ok(())
    }

    /// Reserve `requirement` if every component fits the remaining capacity.
    /// Either everything is reserved or nothing is.
    pub fn try_reserve(&mut self, requirement: &ResourceVector) -> bool {
        let fits = requirement.iter().all(|(resource, amount)| {
            self.usage.get(resource) + amount <= self.capacity.get(resource) + EPSILON
        });
        if !fits {
            return false;
        }
        for (resource, amount) in requirement.iter() {
            *self.usage.entry_mut(resource) += amount;
        }
        true
    }

    /// Return `requirement` to the pool. Over-release clamps at zero.
    pub fn release(&mut self, requirement: &ResourceVector) {
        for (resource, amount) in requirement.iter() {
            let used = self.usage.entry_mut(resource);
            *used = (*used - amount).max(0.0);
            if *used < EPSILON {
                *used = 0.0;
            }
        }
    }

    /// Whether usage stays within capacity for every resource.
    #[must_use]
    pub fn is_within_capacity(&self) -> bool {
        self.usage
            .iter()
            .all(|(resource, used)| used <= self.capacity.get(resource) + EPSILON)
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new(Self::default_capacity())
    }
}
