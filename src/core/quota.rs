//! Credential pool with rolling hourly and daily budgets.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::{Credential, CredentialUsage, QuotaLimits};

/// Interchangeable credentials sharing one set of limits.
///
/// Usage counters live outside the pool, in a ledger keyed by
/// [`Credential::id`], so they can be checkpointed without the secrets.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    limits: QuotaLimits,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>, limits: QuotaLimits) -> Self {
        // Same key listed twice would share one ledger entry anyway
        let mut seen = HashSet::new();
        let credentials = credentials
            .into_iter()
            .filter(|c| seen.insert(c.id()))
            .collect();

        Self {
            credentials,
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Usage entry for `credential`, created on first use and rolled to `now`
    pub fn usage_mut<'l>(
        &self,
        ledger: &'l mut HashMap<String, CredentialUsage>,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> &'l mut CredentialUsage {
        let usage = ledger
            .entry(credential.id())
            .or_insert_with(|| CredentialUsage::new(now));
        usage.roll(now);
        usage
    }

    /// Whether the credential at `index` can take `cost` right now
    pub fn has_headroom(
        &self,
        ledger: &mut HashMap<String, CredentialUsage>,
        index: usize,
        cost: f64,
        now: DateTime<Utc>,
    ) -> bool {
        match self.credentials.get(index) {
            Some(credential) => self
                .usage_mut(ledger, credential, now)
                .has_headroom(&self.limits, cost),
            None => false,
        }
    }

    /// Round-robin search for a credential that can take `cost`.
    ///
    /// Starts at `start` (wrapping) and visits every credential once,
    /// skipping the ones in `throttled`.
    pub fn find_available(
        &self,
        ledger: &mut HashMap<String, CredentialUsage>,
        start: usize,
        cost: f64,
        now: DateTime<Utc>,
        throttled: &HashSet<String>,
    ) -> Option<usize> {
        let n = self.credentials.len();

        (0..n).map(|offset| (start + offset) % n).find(|&index| {
            let credential = &self.credentials[index];
            !throttled.contains(&credential.id()) && self.has_headroom(ledger, index, cost, now)
        })
    }
}
