//! Assignment of build platforms to backends.
//!
//! Three paths, cheapest first:
//!
//! 1. **fast**: one backend, or no request names a platform. Everything
//!    goes to backend 0.
//! 2. **direct**: every requested platform is advertised by some backend.
//!    Requests are split by the advertising backend and only the referenced
//!    backends are booted.
//! 3. **discovery**: some platform is not advertised. All backends are
//!    booted, their workers are asked which platforms they build, and the
//!    split is redone with what they report.
//!
//! When two backends claim the same platform, the first in enumeration order
//! wins.

use super::Options;
use crate::driver::{boot, BuildClient, DriverInfo};
use crate::error::{BrigError, Result};
use crate::platform::Platform;
use crate::progress::ProgressWriter;
use crate::util::TaskGroup;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// One backend's share of a build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPair {
    pub driver_index: usize,
    /// Platforms built on this backend. Empty means the backend default.
    pub platforms: Vec<Platform>,
}

/// Outcome of [`resolve_drivers`].
pub struct Resolution {
    /// Request name to its backend shares.
    pub pairs: HashMap<String, Vec<DriverPair>>,
    /// Clients of the booted backends, by backend index.
    pub clients: Vec<Option<Arc<dyn BuildClient>>>,
}

impl Resolution {
    /// Indexes of the backends referenced by any pair, ascending.
    pub fn driver_indexes(&self) -> Vec<usize> {
        driver_indexes(&self.pairs)
    }

    pub fn client(&self, index: usize) -> Result<Arc<dyn BuildClient>> {
        self.clients
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| BrigError::Internal(format!("backend {} was not booted", index)))
    }
}

/// Assign every request's platforms to backends and boot what is needed.
///
/// `preflight` sees the assignment before any backend is booted (after
/// worker discovery on the discovery path). Returning an error from it
/// aborts resolution.
#[instrument(skip_all, fields(drivers = drivers.len(), requests = opts.len()))]
pub async fn resolve_drivers<F>(
    drivers: &[DriverInfo],
    opts: &HashMap<String, Options>,
    progress: &ProgressWriter,
    cancel: &CancellationToken,
    preflight: F,
) -> Result<Resolution>
where
    F: FnOnce(&HashMap<String, Vec<DriverPair>>) -> Result<()>,
{
    if drivers.is_empty() {
        return Err(BrigError::NoDriverConfigured);
    }

    let mut available = advertised_platforms(drivers);
    let mut undetected = false;
    let mut any_platform = false;
    for opt in opts.values() {
        for p in &opt.platforms {
            any_platform = true;
            if !available.contains_key(&p.normalize().format()) {
                undetected = true;
            }
        }
    }

    if drivers.len() == 1 || !any_platform {
        debug!("Resolving on the fast path");
        let pairs: HashMap<String, Vec<DriverPair>> = opts
            .iter()
            .map(|(name, opt)| {
                let platforms = dedup_platforms(&opt.platforms);
                let pair = DriverPair { driver_index: 0, platforms };
                (name.clone(), vec![pair])
            })
            .collect();
        preflight(&pairs)?;
        let clients = ensure_booted(drivers, &[0], progress, cancel).await?;
        return Ok(Resolution { pairs, clients });
    }

    if !undetected {
        debug!("Resolving from advertised platforms");
        let pairs = split_to_driver_pairs(&available, opts);
        preflight(&pairs)?;
        let clients = ensure_booted(drivers, &driver_indexes(&pairs), progress, cancel).await?;
        return Ok(Resolution { pairs, clients });
    }

    info!("Requested platform not advertised, discovering workers on all backends");
    let all: Vec<usize> = (0..drivers.len()).collect();
    let clients = ensure_booted(drivers, &all, progress, cancel).await?;
    let discovered = discover_platforms(drivers, &clients, cancel).await?;
    for (index, platforms) in discovered.into_iter().enumerate() {
        for p in platforms {
            available.entry(p.format()).or_insert(index);
        }
    }

    let pairs = split_to_driver_pairs(&available, opts);
    preflight(&pairs)?;
    Ok(Resolution { pairs, clients })
}

/// Platform key to the first backend advertising it.
fn advertised_platforms(drivers: &[DriverInfo]) -> HashMap<String, usize> {
    let mut available = HashMap::new();
    for (index, di) in drivers.iter().enumerate() {
        for p in &di.platforms {
            available.entry(p.normalize().format()).or_insert(index);
        }
    }
    available
}

fn dedup_platforms(platforms: &[Platform]) -> Vec<Platform> {
    let mut seen = BTreeSet::new();
    platforms.iter().filter(|p| seen.insert(p.normalize().format())).cloned().collect()
}

/// Partition each request's platforms by the backend that serves them.
/// Pairs are ordered by first appearance of their backend in the request.
fn split_to_driver_pairs(
    available: &HashMap<String, usize>,
    opts: &HashMap<String, Options>,
) -> HashMap<String, Vec<DriverPair>> {
    let mut out = HashMap::with_capacity(opts.len());
    for (name, opt) in opts {
        let mut pairs: Vec<DriverPair> = Vec::new();
        for p in dedup_platforms(&opt.platforms) {
            let index = available.get(&p.normalize().format()).copied().unwrap_or(0);
            match pairs.iter_mut().find(|dp| dp.driver_index == index) {
                Some(pair) => pair.platforms.push(p),
                None => pairs.push(DriverPair { driver_index: index, platforms: vec![p] }),
            }
        }
        if pairs.is_empty() {
            pairs.push(DriverPair { driver_index: 0, platforms: Vec::new() });
        }
        out.insert(name.clone(), pairs);
    }
    out
}

fn driver_indexes(pairs: &HashMap<String, Vec<DriverPair>>) -> Vec<usize> {
    let set: BTreeSet<usize> = pairs.values().flatten().map(|dp| dp.driver_index).collect();
    set.into_iter().collect()
}

/// Boot the backends at `indexes` concurrently. The first failure cancels
/// the remaining boots.
async fn ensure_booted(
    drivers: &[DriverInfo],
    indexes: &[usize],
    progress: &ProgressWriter,
    cancel: &CancellationToken,
) -> Result<Vec<Option<Arc<dyn BuildClient>>>> {
    let mut group = TaskGroup::new(cancel);
    for &index in indexes {
        let di = &drivers[index];
        let driver = di
            .driver
            .clone()
            .ok_or_else(|| BrigError::NoValidDrivers {
                reason: format!("{} has no driver", di.name),
            })?;
        let pw = progress.with_prefix(di.name.clone(), indexes.len() > 1);
        group.spawn(async move {
            let client = boot(driver.as_ref(), &pw).await?;
            Ok((index, client))
        });
    }

    let mut clients: Vec<Option<Arc<dyn BuildClient>>> = vec![None; drivers.len()];
    for (index, client) in group.wait().await? {
        clients[index] = Some(client);
    }
    Ok(clients)
}

/// Ask every booted backend for the platforms its workers build.
async fn discover_platforms(
    drivers: &[DriverInfo],
    clients: &[Option<Arc<dyn BuildClient>>],
    cancel: &CancellationToken,
) -> Result<Vec<Vec<Platform>>> {
    let mut group = TaskGroup::new(cancel);
    for (index, client) in clients.iter().enumerate() {
        let Some(client) = client.clone() else {
            group.spawn(async { Ok(Vec::new()) });
            continue;
        };
        let name = drivers[index].name.clone();
        group.spawn(async move {
            let workers = client
                .list_workers()
                .await
                .map_err(|e| BrigError::ListWorkers { driver: name, reason: e.to_string() })?;
            let mut seen = BTreeSet::new();
            let platforms: Vec<Platform> = workers
                .iter()
                .flat_map(|w| w.platforms.iter())
                .map(Platform::normalize)
                .filter(|p| seen.insert(p.format()))
                .collect();
            Ok(platforms)
        });
    }
    group.wait().await
}
