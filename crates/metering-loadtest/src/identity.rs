//! Billing identities for simulated hosts
//!
//! The [`IdentityRegistry`] is the fixed universe of organizations and cloud
//! accounts generated once per run. The [`HostIdentityCache`] lazily binds
//! every simulated host to one (organization, account) pair drawn from the
//! registry and keeps that binding for the lifetime of the run.

use std::fmt;

use dashmap::DashMap;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfigError, Result};

/// Simulated host identifier
pub type HostId = u64;

fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid()
}

/// Simulated organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(Uuid);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulated cloud marketplace account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing identity bound to a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostIdentity {
    pub organization: OrganizationId,
    pub account: AccountId,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Organization to accounts mapping.
///
/// Fully populated on construction and read-only afterwards, so it can be
/// shared between workers without synchronization. Only built through
/// [`IdentityRegistry::generate`], so it is never empty.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    organizations: IndexMap<OrganizationId, Vec<AccountId>>,
}

impl IdentityRegistry {
    /// Generate `org_count` organizations with `accounts_per_org` accounts each
    pub fn generate(org_count: usize, accounts_per_org: usize) -> Result<Self> {
        Self::generate_with_rng(org_count, accounts_per_org, &mut rand::thread_rng())
    }

    /// Generate the registry from a caller supplied random source
    pub fn generate_with_rng<R: Rng + ?Sized>(
        org_count: usize,
        accounts_per_org: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if org_count == 0 || accounts_per_org == 0 {
            return Err(ConfigError::EmptyRegistry {
                organizations: org_count,
                accounts_per_org,
            });
        }

        let mut organizations = IndexMap::with_capacity(org_count);
        while organizations.len() < org_count {
            let accounts = (0..accounts_per_org)
                .map(|_| AccountId(random_uuid(rng)))
                .collect::<Vec<_>>();
            organizations.insert(OrganizationId(random_uuid(rng)), accounts);
        }

        debug!(
            organizations = org_count,
            accounts_per_org, "Generated identity registry"
        );

        Ok(Self { organizations })
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            organizations: IndexMap::new(),
        }
    }

    /// Number of organizations
    pub fn organization_count(&self) -> usize {
        self.organizations.len()
    }

    /// Accounts owned by an organization
    pub fn accounts(&self, organization: &OrganizationId) -> Option<&[AccountId]> {
        self.organizations.get(organization).map(Vec::as_slice)
    }

    /// Iterate organizations and their accounts in generation order
    pub fn iter(&self) -> impl Iterator<Item = (&OrganizationId, &[AccountId])> {
        self.organizations
            .iter()
            .map(|(org, accounts)| (org, accounts.as_slice()))
    }

    /// Pick an organization uniformly, then one of its accounts uniformly.
    ///
    /// `None` only if there is nothing to pick from.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<HostIdentity> {
        if self.organizations.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.organizations.len());
        let (organization, accounts) = self.organizations.get_index(index)?;
        let account = accounts.choose(rng)?;

        Some(HostIdentity {
            organization: *organization,
            account: *account,
        })
    }
}

// ============================================================================
// HOST CACHE
// ============================================================================

/// Lazily populated host to identity mapping.
///
/// The only mutable structure shared between workers. Assignment goes
/// through an atomic create-if-absent on the host's shard, so racing first
/// calls for one host may each draw a candidate but exactly one is kept.
#[derive(Debug, Default)]
pub struct HostIdentityCache {
    identities: DashMap<HostId, HostIdentity>,
    seed: Option<u64>,
}

impl HostIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose draws are derived from `seed` and the host id, making the
    /// host to identity mapping reproducible across runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            identities: DashMap::new(),
            seed: Some(seed),
        }
    }

    /// Return the identity of `host_id`, assigning one on first use
    pub fn resolve(&self, host_id: HostId, registry: &IdentityRegistry) -> Option<HostIdentity> {
        if let Some(identity) = self.identities.get(&host_id) {
            return Some(*identity);
        }

        let candidate = match self.seed {
            Some(seed) => registry.pick(&mut host_rng(seed, host_id)),
            None => registry.pick(&mut rand::thread_rng()),
        }?;

        let identity = *self.identities.entry(host_id).or_insert(candidate);
        if identity == candidate {
            debug!(
                host_id,
                organization = %identity.organization,
                account = %identity.account,
                "Assigned host identity"
            );
        }
        Some(identity)
    }

    /// Identity of `host_id` if one was already assigned
    pub fn get(&self, host_id: HostId) -> Option<HostIdentity> {
        self.identities.get(&host_id).map(|identity| *identity)
    }

    /// Number of hosts with an assigned identity
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

fn host_rng(seed: u64, host_id: HostId) -> StdRng {
    StdRng::seed_from_u64(seed ^ host_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_registry_partitions_accounts() {
        let registry = IdentityRegistry::generate(20, 5).unwrap();
        assert_eq!(registry.organization_count(), 20);

        let mut seen = HashSet::new();
        for (_, accounts) in registry.iter() {
            assert_eq!(accounts.len(), 5);
            for account in accounts {
                assert!(seen.insert(*account), "account listed under two organizations");
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert_eq!(
            IdentityRegistry::generate(0, 5).unwrap_err(),
            ConfigError::EmptyRegistry {
                organizations: 0,
                accounts_per_org: 5
            }
        );
        assert!(IdentityRegistry::generate(3, 0).is_err());
    }

    #[test]
    fn test_empty_registry_resolves_to_none() {
        let registry = IdentityRegistry::empty();
        assert_eq!(registry.pick(&mut rand::thread_rng()), None);

        let cache = HostIdentityCache::new();
        assert_eq!(cache.resolve(1, &registry), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pick_stays_within_registry() {
        let registry = IdentityRegistry::generate(4, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let identity = registry.pick(&mut rng).unwrap();
            let accounts = registry.accounts(&identity.organization).unwrap();
            assert!(accounts.contains(&identity.account));
        }
    }

    #[test]
    fn test_resolve_is_stable() {
        let registry = IdentityRegistry::generate(10, 5).unwrap();
        let cache = HostIdentityCache::new();

        let first = cache.resolve(42, &registry).unwrap();
        for _ in 0..100 {
            assert_eq!(cache.resolve(42, &registry), Some(first));
        }
        assert_eq!(cache.get(42), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_first_access_commits_one_identity() {
        // Many organizations so independent draws almost surely differ.
        let registry = Arc::new(IdentityRegistry::generate(1000, 5).unwrap());

        for host_id in 0..20 {
            let cache = Arc::new(HostIdentityCache::new());
            let barrier = Arc::new(Barrier::new(8));

            let handles = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        cache.resolve(host_id, &registry).unwrap()
                    })
                })
                .collect::<Vec<_>>();

            let results = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>();

            let committed = cache.get(host_id).unwrap();
            assert!(results.iter().all(|identity| *identity == committed));
            assert_eq!(cache.resolve(host_id, &registry), Some(committed));
        }
    }

    #[test]
    fn test_seeded_cache_reproduces_mapping() {
        let mut rng = StdRng::seed_from_u64(99);
        let registry = IdentityRegistry::generate_with_rng(50, 4, &mut rng).unwrap();

        let a = HostIdentityCache::seeded(1234);
        let b = HostIdentityCache::seeded(1234);

        // Resolve in opposite orders; the mapping must not depend on it.
        for host_id in 0..30 {
            a.resolve(host_id, &registry);
        }
        for host_id in (0..30).rev() {
            b.resolve(host_id, &registry);
        }
        for host_id in 0..30 {
            assert_eq!(a.get(host_id), b.get(host_id));
        }
    }

    #[test]
    fn test_seeded_registry_reproduces() {
        let a = IdentityRegistry::generate_with_rng(3, 2, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = IdentityRegistry::generate_with_rng(3, 2, &mut StdRng::seed_from_u64(5)).unwrap();
        let a = a.iter().map(|(o, acc)| (*o, acc.to_vec())).collect::<Vec<_>>();
        let b = b.iter().map(|(o, acc)| (*o, acc.to_vec())).collect::<Vec<_>>();
        assert_eq!(a, b);
    }
}
