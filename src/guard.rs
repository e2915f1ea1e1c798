//! Single-slot task guard for workspace actions.
//!
//! At most one action runs against a workspace at a time. A second action
//! started while the slot is taken is rejected with [`StockError::Busy`]
//! rather than queued. Display reads never take the slot: they wait for a
//! running action to finish, and an action waits for reads already in
//! progress before it touches the value.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::StockError;

/// Actions a user can trigger against their workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    SignIn,
    Load,
    Import,
    Edit,
    SetAsAtDate,
    Save,
    Delete,
    Export,
    SignOut,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::SignIn => "sign-in",
            Action::Load => "load",
            Action::Import => "import",
            Action::Edit => "edit",
            Action::SetAsAtDate => "as-at date change",
            Action::Save => "save",
            Action::Delete => "delete",
            Action::Export => "export",
            Action::SignOut => "sign-out",
        };
        f.write_str(name)
    }
}

/// Owns a value and lets one action at a time hold it mutably.
pub struct TaskGuard<T> {
    value: Arc<RwLock<T>>,
    slot: Arc<StdMutex<Option<Action>>>,
}

impl<T> Clone for TaskGuard<T> {
    fn clone(&self) -> Self {
        TaskGuard {
            value: Arc::clone(&self.value),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Send + Sync + 'static> TaskGuard<T> {
    pub fn new(value: T) -> Self {
        TaskGuard {
            value: Arc::new(RwLock::new(value)),
            slot: Arc::new(StdMutex::new(None)),
        }
    }

    /// Claim the slot for `action`, failing at once if another action holds it.
    ///
    /// Once claimed, the action waits for reads in progress to drain.
    pub async fn try_begin(&self, action: Action) -> Result<ActionPermit<T>, StockError> {
        let claim = self.claim(action)?;
        let guard = Arc::clone(&self.value).write_owned().await;
        log::debug!("{} started", action);
        Ok(ActionPermit { guard, claim })
    }

    /// Wait for any running action to finish, then share the value; for read-only views.
    pub async fn read(&self) -> OwnedRwLockReadGuard<T> {
        Arc::clone(&self.value).read_owned().await
    }

    pub fn in_flight(&self) -> Option<Action> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight().is_some()
    }

    fn claim(&self, action: Action) -> Result<SlotClaim, StockError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(in_flight) = *slot {
            log::warn!("rejected {} while {} is in progress", action, in_flight);
            return Err(StockError::Busy {
                requested: action,
                in_flight,
            });
        }
        *slot = Some(action);
        Ok(SlotClaim {
            action,
            slot: Arc::clone(&self.slot),
        })
    }
}

// Holds the slot; released on drop, including when `try_begin` is
// cancelled while waiting for readers.
struct SlotClaim {
    action: Action,
    slot: Arc<StdMutex<Option<Action>>>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        log::debug!("{} finished", self.action);
    }
}

/// Exclusive access for the duration of one action; releases the slot on drop.
pub struct ActionPermit<T> {
    // Dropped before `claim`, so the value is free by the time the slot reopens.
    guard: OwnedRwLockWriteGuard<T>,
    claim: SlotClaim,
}

impl<T> ActionPermit<T> {
    pub fn action(&self) -> Action {
        self.claim.action
    }
}

impl<T> Deref for ActionPermit<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ActionPermit<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
