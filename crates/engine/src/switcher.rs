//! Two-slot input aliasing
//!
//! A long-running dual-input encoder reads its inputs through two stable
//! filesystem aliases. Re-pointing an alias changes what the encoder sees on
//! its next loop iteration of that input, without restarting it.
//!
//! Not internally locked; the controller serializes access.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::process::unix_timestamp_ms;

/// Number of input slots
pub const SLOT_COUNT: usize = 2;

const ALIAS_PREFIX: &str = "loop_slot_";
const TEMP_PREFIX: &str = ".loop_slot_";

/// Error type for slot operations
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Invalid slot index {0} (expected 0 or 1)")]
    InvalidSlot(usize),

    #[error("Source not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Source not readable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Slot {0} has no source loaded")]
    SlotNotLoaded(usize),

    #[error("Failed to update alias {path}: {source}")]
    Alias {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One input identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub index: usize,
    /// Source the alias currently points at
    pub target: Option<PathBuf>,
    /// Stable path handed to the encoder
    pub alias: PathBuf,
    pub active: bool,
    pub loaded_at_unix_ms: Option<i64>,
}

/// Passed to switch callbacks after a completed switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub from_slot: usize,
    pub to_slot: usize,
    pub source: PathBuf,
    pub switch_count: u64,
}

pub type SwitchCallback = Box<dyn Fn(&SlotChange) -> Result<(), String> + Send + Sync>;

pub struct InputSwitcher {
    alias_dir: PathBuf,
    slots: [InputSlot; SLOT_COUNT],
    switch_count: u64,
    callbacks: Vec<SwitchCallback>,
}

impl std::fmt::Debug for InputSwitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSwitcher")
            .field("alias_dir", &self.alias_dir)
            .field("slots", &self.slots)
            .field("switch_count", &self.switch_count)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl InputSwitcher {
    /// Create a switcher whose aliases live in `alias_dir`. Touches nothing on disk.
    pub fn new(alias_dir: impl Into<PathBuf>) -> Self {
        let alias_dir = alias_dir.into();
        let slots = [0, 1].map(|index| InputSlot {
            index,
            target: None,
            alias: alias_dir.join(format!("{}{}.mp4", ALIAS_PREFIX, index)),
            active: index == 0,
            loaded_at_unix_ms: None,
        });
        Self {
            alias_dir,
            slots,
            switch_count: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn alias_dir(&self) -> &Path {
        &self.alias_dir
    }

    pub fn slots(&self) -> &[InputSlot; SLOT_COUNT] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Result<&InputSlot, SwitchError> {
        self.slots.get(index).ok_or(SwitchError::InvalidSlot(index))
    }

    pub fn alias_path(&self, index: usize) -> Result<&Path, SwitchError> {
        Ok(&self.slot(index)?.alias)
    }

    pub fn active_slot(&self) -> usize {
        self.slots.iter().position(|s| s.active).unwrap_or(0)
    }

    pub fn inactive_slot(&self) -> usize {
        1 - self.active_slot()
    }

    /// Source behind the active slot
    pub fn active_source(&self) -> Option<&Path> {
        self.slots[self.active_slot()].target.as_deref()
    }

    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    /// Register a callback fired after every completed switch
    pub fn on_switch(&mut self, callback: SwitchCallback) {
        self.callbacks.push(callback);
    }

    /// Point `slot`'s alias at `source`.
    ///
    /// The new link is created under a temporary name and renamed over the
    /// alias, so a reader never finds the alias missing.
    pub fn prepare_input(&mut self, source: &Path, slot: usize) -> Result<&InputSlot, SwitchError> {
        if slot >= SLOT_COUNT {
            return Err(SwitchError::InvalidSlot(slot));
        }
        let target = check_source(source)?;
        self.relink(slot, &target)?;

        let entry = &mut self.slots[slot];
        entry.target = Some(target);
        entry.loaded_at_unix_ms = Some(unix_timestamp_ms());
        debug!(slot, alias = %entry.alias.display(), "slot prepared");
        Ok(entry)
    }

    /// Make `slot` the active one, fire callbacks and count the switch
    pub fn complete_switch(&mut self, slot: usize) -> Result<u64, SwitchError> {
        let entry = self.slot(slot)?;
        let source = entry
            .target
            .clone()
            .ok_or(SwitchError::SlotNotLoaded(slot))?;
        let from_slot = self.active_slot();

        for s in self.slots.iter_mut() {
            s.active = s.index == slot;
        }
        self.switch_count += 1;

        let change = SlotChange {
            from_slot,
            to_slot: slot,
            source,
            switch_count: self.switch_count,
        };
        info!(
            from_slot,
            to_slot = slot,
            source = %change.source.display(),
            switch_count = self.switch_count,
            "input slot switched"
        );
        for callback in &self.callbacks {
            if let Err(e) = callback(&change) {
                warn!(error = %e, "switch callback failed");
            }
        }
        Ok(self.switch_count)
    }

    /// Load `new_source` into the inactive slot and activate it immediately
    pub fn switch_input(&mut self, new_source: &Path) -> Result<usize, SwitchError> {
        let slot = self.inactive_slot();
        self.prepare_input(new_source, slot)?;
        self.complete_switch(slot)?;
        Ok(slot)
    }

    /// Re-point an already loaded slot without switching
    pub fn update_symlink(&mut self, slot: usize, path: &Path) -> Result<(), SwitchError> {
        if self.slot(slot)?.target.is_none() {
            return Err(SwitchError::SlotNotLoaded(slot));
        }
        self.prepare_input(path, slot)?;
        Ok(())
    }

    /// Remove aliases and leftover temporary links. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        for slot in self.slots.iter_mut() {
            remove_if_present(&slot.alias);
            slot.target = None;
            slot.loaded_at_unix_ms = None;
            slot.active = slot.index == 0;
        }

        let entries = match fs::read_dir(&self.alias_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                remove_if_present(&entry.path());
            }
        }
    }

    fn relink(&self, slot: usize, target: &Path) -> Result<(), SwitchError> {
        let alias = &self.slots[slot].alias;
        let alias_err = |source| SwitchError::Alias {
            path: alias.clone(),
            source,
        };

        fs::create_dir_all(&self.alias_dir).map_err(alias_err)?;
        let temp = self
            .alias_dir
            .join(format!("{}{}.{}.tmp", TEMP_PREFIX, slot, Uuid::new_v4().simple()));
        make_link(target, &temp).map_err(alias_err)?;
        if let Err(e) = fs::rename(&temp, alias) {
            remove_if_present(&temp);
            return Err(alias_err(e));
        }
        Ok(())
    }
}

/// Absolute, readable source path
fn check_source(source: &Path) -> Result<PathBuf, SwitchError> {
    let target = match fs::canonicalize(source) {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SwitchError::SourceMissing(source.to_path_buf()))
        }
        Err(e) => {
            return Err(SwitchError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };
    fs::File::open(&target).map_err(|e| SwitchError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;
    Ok(target)
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove alias"),
    }
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
