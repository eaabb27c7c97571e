//! Context → store routing.

use super::{Store, StoreInfo};
use crate::config::StoreSettings;
use crate::core::context::{Context, ContextRouter};
use crate::error::{Error, Result};
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Open stores, keyed by context.
///
/// The general store always exists. User and project stores open on first
/// use; when they cannot, callers transparently get the general store.
#[derive(Debug)]
pub struct Stores {
    router: Arc<ContextRouter>,
    settings: RwLock<StoreSettings>,
    open: RwLock<HashMap<Context, Arc<Store>>>,
    failed: Mutex<HashSet<Context>>,
}

impl Stores {
    /// Open the general store (fatal on failure) and any other context
    /// that has a configured location.
    pub fn initialize(router: Arc<ContextRouter>, settings: StoreSettings) -> Result<Self> {
        let stores = Self {
            router,
            settings: RwLock::new(settings),
            open: RwLock::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
        };
        stores.open_all()?;
        Ok(stores)
    }

    fn open_all(&self) -> Result<()> {
        let general = self.open_context(Context::General).map_err(|e| {
            error!("General store failed to open: {}", e);
            e
        })?;
        self.write_open().insert(Context::General, general);
        for ctx in [Context::User, Context::Project] {
            if self.router.has_own_store(ctx) {
                self.try_open(ctx);
            }
        }
        Ok(())
    }

    fn write_open(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Context, Arc<Store>>> {
        self.open.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_open(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Context, Arc<Store>>> {
        self.open.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the store for `ctx`, sharing one already open at the same
    /// location.
    fn open_context(&self, ctx: Context) -> Result<Arc<Store>> {
        let dir = self.router.get_store_location(ctx);
        if let Some(shared) = self.read_open().values().find(|s| same_dir(s.dir(), &dir)) {
            info!("{} context shares store {}", ctx, shared.path().display());
            return Ok(Arc::clone(shared));
        }
        let settings = self.settings.read().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(Arc::new(Store::open(ctx, &dir, &settings)?))
    }

    fn try_open(&self, ctx: Context) -> Option<Arc<Store>> {
        match self.open_context(ctx) {
            Ok(store) => {
                self.write_open().insert(ctx, Arc::clone(&store));
                Some(store)
            }
            Err(e) => {
                warn!("{} store unavailable, using general: {}", ctx, e);
                self.failed.lock().unwrap_or_else(|e| e.into_inner()).insert(ctx);
                None
            }
        }
    }

    /// The general store.
    pub fn general(&self) -> Result<Arc<Store>> {
        self.read_open().get(&Context::General).cloned().ok_or(Error::StoreUnavailable(Context::General))
    }

    /// Store serving `ctx`, opening it lazily. Contexts without their own
    /// location, or whose store failed to open, get the general store.
    pub fn store(&self, ctx: Context) -> Result<Arc<Store>> {
        if let Some(store) = self.read_open().get(&ctx) {
            return Ok(Arc::clone(store));
        }
        let failed = self.failed.lock().unwrap_or_else(|e| e.into_inner()).contains(&ctx);
        if ctx != Context::General && !failed && self.router.has_own_store(ctx) {
            if let Some(store) = self.try_open(ctx) {
                return Ok(store);
            }
        }
        self.general()
    }

    /// Context and store responsible for `path`.
    pub fn store_for_path(&self, path: &Path) -> Result<(Context, Arc<Store>)> {
        let ctx = self.router.get_context(path);
        Ok((ctx, self.store(ctx)?))
    }

    /// Re-open everything against new settings and locations. On failure
    /// the previous stores stay in place.
    pub fn reload(&self, settings: StoreSettings) -> Result<()> {
        let previous = std::mem::take(&mut *self.write_open());
        let old_settings = std::mem::replace(&mut *self.settings.write().unwrap_or_else(|e| e.into_inner()), settings);
        self.failed.lock().unwrap_or_else(|e| e.into_inner()).clear();
        if let Err(e) = self.open_all() {
            *self.write_open() = previous;
            *self.settings.write().unwrap_or_else(|e| e.into_inner()) = old_settings;
            return Err(e);
        }
        info!("Stores reloaded");
        Ok(())
    }

    /// Each distinct open store once.
    pub fn distinct(&self) -> Vec<Arc<Store>> {
        let open = self.read_open();
        let mut out: Vec<Arc<Store>> = Vec::new();
        for ctx in Context::ALL {
            if let Some(store) = open.get(&ctx) {
                if !out.iter().any(|s| Arc::ptr_eq(s, store)) {
                    out.push(Arc::clone(store));
                }
            }
        }
        out
    }

    pub fn info_all(&self) -> Vec<StoreInfo> {
        self.distinct()
            .iter()
            .filter_map(|s| match s.info() {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("No info for {}: {}", s.path().display(), e);
                    None
                }
            })
            .collect()
    }

    /// Back up every distinct store; failures are logged and skipped.
    pub fn backup_all(&self) -> Vec<PathBuf> {
        self.distinct()
            .iter()
            .filter_map(|s| match s.create_backup(None) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Backup of {} failed: {}", s.path().display(), e);
                    None
                }
            })
            .collect()
    }

    /// Vacuum every distinct store. Returns how many succeeded.
    pub fn vacuum_all(&self) -> usize {
        self.distinct()
            .iter()
            .filter(|s| match s.vacuum() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Vacuum of {} failed: {}", s.path().display(), e);
                    false
                }
            })
            .count()
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
