use crate::cs::memory::{Domain, Domains, SharedBuffer, buffer_key};
use crate::drm::ioctl::GemInfoArgs;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("{0} demand of the command stream exceeds its budget")]
    OverBudget(Domain),
}

/// Per-domain byte ceilings. A domain without a ceiling is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceBudget {
    limits: HashMap<Domain, u64>,
}

impl SpaceBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// VRAM ceiling from the CPU-visible VRAM size, GTT ceiling from the GART size.
    #[must_use]
    pub fn from_gem_info(info: &GemInfoArgs) -> Self {
        let mut budget = Self::new();
        budget.set_limit(Domain::Vram, info.vram_visible);
        budget.set_limit(Domain::Gtt, info.gart_size);
        budget
    }

    pub fn set_limit(&mut self, domain: Domain, bytes: u64) {
        self.limits.insert(domain, bytes);
    }

    #[must_use]
    pub fn limit(&self, domain: Domain) -> Option<u64> {
        self.limits.get(&domain).copied()
    }
}

#[derive(Debug)]
struct Demand {
    buffer: SharedBuffer,
    domains: Domains,
}

impl Demand {
    fn charged(&self, domain: Domain) -> u64 {
        if Domain::from_domains(self.domains) == Some(domain) {
            self.buffer.size()
        } else {
            0
        }
    }
}

/// Tracks how much VRAM and GTT the buffers referenced by a stream need.
///
/// Persistent demand lives until removed; referenced demand is cleared on every flush.
#[derive(Debug, Default)]
pub struct SpaceAccountant {
    budget: SpaceBudget,
    persistent: HashMap<usize, Demand>,
    referenced: HashMap<usize, Demand>,
}

impl SpaceAccountant {
    #[must_use]
    pub fn new(budget: SpaceBudget) -> Self {
        Self {
            budget,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn budget(&self) -> &SpaceBudget {
        &self.budget
    }

    pub fn set_limit(&mut self, domain: Domain, bytes: u64) {
        self.budget.set_limit(domain, bytes);
    }

    pub fn set_budget(&mut self, budget: SpaceBudget) {
        self.budget = budget;
    }

    /// Adds a buffer that stays resident in `domain` across flushes, or moves an
    /// already tracked persistent buffer to `domain`.
    pub fn add_persistent(&mut self, buffer: &SharedBuffer, domain: Domain) {
        self.persistent.insert(
            buffer_key(buffer),
            Demand {
                buffer: Arc::clone(buffer),
                domains: domain.flags(),
            },
        );
    }

    /// Returns whether the buffer was tracked.
    pub fn remove_persistent(&mut self, buffer: &SharedBuffer) -> bool {
        self.persistent.remove(&buffer_key(buffer)).is_some()
    }

    /// Charges a buffer referenced by a relocation until the next flush.
    ///
    /// Domains of repeated references are merged.
    pub fn add_referenced(&mut self, buffer: &SharedBuffer, domains: Domains) {
        self.referenced
            .entry(buffer_key(buffer))
            .and_modify(|d| d.domains |= domains)
            .or_insert_with(|| Demand {
                buffer: Arc::clone(buffer),
                domains,
            });
    }

    /// Total bytes charged against `domain`, saturating at `u64::MAX`.
    ///
    /// A buffer that is both persistent and referenced is charged once, in its persistent domain.
    #[must_use]
    pub fn demand(&self, domain: Domain) -> u64 {
        let referenced = self
            .referenced
            .iter()
            .filter(|(key, _)| !self.persistent.contains_key(key))
            .map(|(_, d)| d);

        self.persistent
            .values()
            .chain(referenced)
            .fold(0u64, |total, d| total.saturating_add(d.charged(domain)))
    }

    /// Compares demand against the budget. Ceilings are inclusive.
    ///
    /// # Errors
    /// `OverBudget` naming the first domain (VRAM, then GTT) whose demand exceeds its ceiling.
    pub fn check(&self) -> Result<(), SpaceError> {
        for domain in [Domain::Vram, Domain::Gtt] {
            let Some(limit) = self.budget.limit(domain) else {
                continue;
            };
            let demand = self.demand(domain);
            if demand > limit {
                log::debug!("CS: space check, {domain} demand {demand} exceeds limit {limit}");
                return Err(SpaceError::OverBudget(domain));
            }
        }
        Ok(())
    }

    pub fn clear_referenced(&mut self) {
        self.referenced.clear();
    }

    pub fn clear_persistent(&mut self) {
        self.persistent.clear();
    }
}
