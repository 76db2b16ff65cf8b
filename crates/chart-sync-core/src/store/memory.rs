//! In-memory [`ApplicationStore`] and [`VersionStore`] for tests.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Enforces the same natural-key
//! uniqueness as the SQLite schema and records the size of every
//! [`save_batch`](VersionStore::save_batch) call so tests can assert on
//! flush boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Application, NewVersion, SourceRef, VersionRecord};

use super::{ApplicationStore, VersionStore};

/// In-memory store backing both registries.
pub struct InMemoryStore {
    apps: RwLock<Vec<Application>>,
    versions: RwLock<Vec<VersionRecord>>,
    batches: RwLock<Vec<usize>>,
    updates: RwLock<Vec<Vec<VersionRecord>>>,
    fail_save_batch: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            apps: RwLock::new(Vec::new()),
            versions: RwLock::new(Vec::new()),
            batches: RwLock::new(Vec::new()),
            updates: RwLock::new(Vec::new()),
            fail_save_batch: AtomicBool::new(false),
        }
    }

    /// Sizes of every `save_batch` call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        read(&self.batches).map(|b| b.clone()).unwrap_or_default()
    }

    /// Every bulk version update, in call order.
    pub fn version_updates(&self) -> Vec<Vec<VersionRecord>> {
        read(&self.updates).map(|u| u.clone()).unwrap_or_default()
    }

    /// Snapshot of all stored applications.
    pub fn applications(&self) -> Vec<Application> {
        read(&self.apps).map(|a| a.clone()).unwrap_or_default()
    }

    /// Snapshot of all stored versions of one application, in insert order.
    pub fn versions_of(&self, application_id: i64) -> Vec<VersionRecord> {
        read(&self.versions)
            .map(|v| {
                v.iter()
                    .filter(|r| r.application_id == application_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make every subsequent `save_batch` call fail.
    pub fn fail_save_batch(&self, fail: bool) {
        self.fail_save_batch.store(fail, Ordering::SeqCst);
    }

    /// Overwrite the latest flag of a stored record directly, bypassing the
    /// engine. Used to set up broken invariants.
    pub fn force_latest(&self, id: i64, latest: bool) -> Result<()> {
        let mut versions = write(&self.versions)?;
        let record = versions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("no version with id {}", id))?;
        record.latest = latest;
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn find_by_source(&self, source: &SourceRef) -> Result<Vec<Application>> {
        let apps = read(&self.apps)?;
        Ok(apps.iter().filter(|a| &a.source == source).cloned().collect())
    }

    async fn find_inactive_by_name(
        &self,
        source: &SourceRef,
        name: &str,
    ) -> Result<Option<Application>> {
        let apps = read(&self.apps)?;
        Ok(apps
            .iter()
            .find(|a| &a.source == source && a.name == name && !a.active)
            .cloned())
    }

    async fn save(&self, app: &Application) -> Result<Application> {
        let mut apps = write(&self.apps)?;
        if let Some(existing) = apps
            .iter_mut()
            .find(|a| a.source == app.source && a.name == app.name)
        {
            existing.active = true;
            existing.updated_on = app.updated_on;
            return Ok(existing.clone());
        }
        let mut stored = app.clone();
        stored.id = apps.len() as i64 + 1;
        apps.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, updated: &[Application]) -> Result<()> {
        let mut apps = write(&self.apps)?;
        for app in updated {
            let existing = apps
                .iter_mut()
                .find(|a| a.id == app.id)
                .ok_or_else(|| anyhow!("no application with id {}", app.id))?;
            existing.active = app.active;
            existing.updated_on = app.updated_on;
        }
        Ok(())
    }
}

#[async_trait]
impl VersionStore for InMemoryStore {
    async fn find_by_application(&self, application_id: i64) -> Result<Vec<VersionRecord>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .iter()
            .filter(|r| r.application_id == application_id)
            .map(VersionRecord::summary)
            .collect())
    }

    async fn save_batch(&self, batch: &[NewVersion]) -> Result<u64> {
        write(&self.batches)?.push(batch.len());
        if self.fail_save_batch.load(Ordering::SeqCst) {
            bail!("injected save_batch failure");
        }
        let mut versions = write(&self.versions)?;
        let mut inserted = 0;
        for new in batch {
            let duplicate = versions
                .iter()
                .any(|r| r.application_id == new.application_id && r.version == new.version);
            if duplicate {
                continue;
            }
            let id = versions.len() as i64 + 1;
            versions.push(VersionRecord::from_new(id, new.clone()));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find_latest(&self, application_id: i64) -> Result<Option<VersionRecord>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .iter()
            .find(|r| r.application_id == application_id && r.latest)
            .cloned())
    }

    async fn find_most_recently_created(
        &self,
        application_id: i64,
    ) -> Result<Option<VersionRecord>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .iter()
            .filter(|r| r.application_id == application_id)
            .max_by_key(|r| (r.created, r.id))
            .cloned())
    }

    async fn find_by_application_and_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<VersionRecord>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .iter()
            .find(|r| r.application_id == application_id && r.version == version)
            .cloned())
    }

    async fn update(&self, updated: &[VersionRecord]) -> Result<()> {
        write(&self.updates)?.push(updated.to_vec());
        let mut versions = write(&self.versions)?;
        for record in updated {
            let existing = versions
                .iter_mut()
                .find(|r| r.id == record.id)
                .ok_or_else(|| anyhow!("no version with id {}", record.id))?;
            existing.latest = record.latest;
            existing.updated_on = record.updated_on;
        }
        Ok(())
    }
}
