//! Application policy for client resets.

use crate::reset::error::ClientResetRequiredError;
use crate::session::SyncSession;
use driftdb_core::{FrozenView, MutableView};
use std::fmt;

/// Error type strategy hooks return.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type strategy hooks return.
pub type HookResult = Result<(), HookError>;

/// Runs before any reset work with a frozen copy of the local data.
pub type BeforeHook = Box<dyn Fn(&FrozenView) -> HookResult + Send + Sync>;

/// Runs after the database was rebased, inside a write transaction.
///
/// Receives the pre-reset snapshot and the rebased database. Writes made
/// through the mutable view commit when the hook returns `Ok`.
pub type AfterHook = Box<dyn Fn(&FrozenView, &mut MutableView<'_>) -> HookResult + Send + Sync>;

/// Runs when the reset cannot be completed automatically.
pub type FallbackHook = Box<dyn Fn(&SyncSession, &ClientResetRequiredError) + Send + Sync>;

/// Leave the reset entirely to the application.
pub struct Manual {
    pub(crate) on_client_reset: FallbackHook,
}

impl Manual {
    /// Creates the strategy with the hook that receives every reset.
    pub fn new<F>(on_client_reset: F) -> Self
    where
        F: Fn(&SyncSession, &ClientResetRequiredError) + Send + Sync + 'static,
    {
        Self {
            on_client_reset: Box::new(on_client_reset),
        }
    }
}

/// Drop unsynced local changes and continue from the server state.
pub struct DiscardUnsynced {
    pub(crate) on_before_reset: Option<BeforeHook>,
    pub(crate) on_after_reset: Option<AfterHook>,
    pub(crate) on_manual_reset_fallback: FallbackHook,
}

impl DiscardUnsynced {
    /// Creates the strategy with its mandatory fallback hook.
    pub fn new<F>(on_manual_reset_fallback: F) -> Self
    where
        F: Fn(&SyncSession, &ClientResetRequiredError) + Send + Sync + 'static,
    {
        Self {
            on_before_reset: None,
            on_after_reset: None,
            on_manual_reset_fallback: Box::new(on_manual_reset_fallback),
        }
    }

    /// Sets the hook run before the local data is discarded.
    #[must_use]
    pub fn with_before_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView) -> HookResult + Send + Sync + 'static,
    {
        self.on_before_reset = Some(Box::new(hook));
        self
    }

    /// Sets the hook run after the local data was discarded.
    #[must_use]
    pub fn with_after_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView, &mut MutableView<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.on_after_reset = Some(Box::new(hook));
        self
    }
}

/// Replay unsynced local changes on top of the server state; fall back to
/// the application if that is impossible.
pub struct RecoverUnsynced {
    pub(crate) on_before_reset: Option<BeforeHook>,
    pub(crate) on_after_reset: Option<AfterHook>,
    pub(crate) on_manual_reset_fallback: FallbackHook,
}

impl RecoverUnsynced {
    /// Creates the strategy with its mandatory fallback hook.
    pub fn new<F>(on_manual_reset_fallback: F) -> Self
    where
        F: Fn(&SyncSession, &ClientResetRequiredError) + Send + Sync + 'static,
    {
        Self {
            on_before_reset: None,
            on_after_reset: None,
            on_manual_reset_fallback: Box::new(on_manual_reset_fallback),
        }
    }

    /// Sets the hook run before recovery.
    #[must_use]
    pub fn with_before_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView) -> HookResult + Send + Sync + 'static,
    {
        self.on_before_reset = Some(Box::new(hook));
        self
    }

    /// Sets the hook run after a successful recovery.
    #[must_use]
    pub fn with_after_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView, &mut MutableView<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.on_after_reset = Some(Box::new(hook));
        self
    }
}

/// Try to replay unsynced changes; discard them if that fails.
pub struct RecoverOrDiscard {
    pub(crate) on_before_reset: Option<BeforeHook>,
    pub(crate) on_after_recovery: Option<AfterHook>,
    pub(crate) on_after_discard: Option<AfterHook>,
    pub(crate) on_manual_reset_fallback: FallbackHook,
}

impl RecoverOrDiscard {
    /// Creates the strategy with its mandatory fallback hook.
    pub fn new<F>(on_manual_reset_fallback: F) -> Self
    where
        F: Fn(&SyncSession, &ClientResetRequiredError) + Send + Sync + 'static,
    {
        Self {
            on_before_reset: None,
            on_after_recovery: None,
            on_after_discard: None,
            on_manual_reset_fallback: Box::new(on_manual_reset_fallback),
        }
    }

    /// Sets the hook run before recovery is attempted.
    #[must_use]
    pub fn with_before_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView) -> HookResult + Send + Sync + 'static,
    {
        self.on_before_reset = Some(Box::new(hook));
        self
    }

    /// Sets the hook run when unsynced changes were recovered.
    #[must_use]
    pub fn with_after_recovery<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView, &mut MutableView<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.on_after_recovery = Some(Box::new(hook));
        self
    }

    /// Sets the hook run when unsynced changes had to be discarded.
    #[must_use]
    pub fn with_after_discard<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrozenView, &mut MutableView<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.on_after_discard = Some(Box::new(hook));
        self
    }
}

/// What a session does when the server requires a client reset.
pub enum ResetStrategy {
    /// See [`Manual`].
    Manual(Manual),
    /// See [`DiscardUnsynced`].
    DiscardUnsynced(DiscardUnsynced),
    /// See [`RecoverUnsynced`].
    RecoverUnsynced(RecoverUnsynced),
    /// See [`RecoverOrDiscard`].
    RecoverOrDiscard(RecoverOrDiscard),
}

/// How the executor rebases after the before hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Discard,
    Recover,
    RecoverOrDiscard,
}

/// Flat view of a strategy's hooks.
pub(crate) struct HookTable<'a> {
    /// `None` for strategies that never reset automatically.
    pub(crate) mode: Option<Mode>,
    pub(crate) before: Option<&'a BeforeHook>,
    pub(crate) after_recovery: Option<&'a AfterHook>,
    pub(crate) after_discard: Option<&'a AfterHook>,
    pub(crate) fallback: &'a FallbackHook,
}

impl ResetStrategy {
    /// Name of the variant, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ResetStrategy::Manual(_) => "Manual",
            ResetStrategy::DiscardUnsynced(_) => "DiscardUnsynced",
            ResetStrategy::RecoverUnsynced(_) => "RecoverUnsynced",
            ResetStrategy::RecoverOrDiscard(_) => "RecoverOrDiscard",
        }
    }

    pub(crate) fn hooks(&self) -> HookTable<'_> {
        match self {
            ResetStrategy::Manual(s) => HookTable {
                mode: None,
                before: None,
                after_recovery: None,
                after_discard: None,
                fallback: &s.on_client_reset,
            },
            ResetStrategy::DiscardUnsynced(s) => HookTable {
                mode: Some(Mode::Discard),
                before: s.on_before_reset.as_ref(),
                after_recovery: None,
                after_discard: s.on_after_reset.as_ref(),
                fallback: &s.on_manual_reset_fallback,
            },
            ResetStrategy::RecoverUnsynced(s) => HookTable {
                mode: Some(Mode::Recover),
                before: s.on_before_reset.as_ref(),
                after_recovery: s.on_after_reset.as_ref(),
                after_discard: None,
                fallback: &s.on_manual_reset_fallback,
            },
            ResetStrategy::RecoverOrDiscard(s) => HookTable {
                mode: Some(Mode::RecoverOrDiscard),
                before: s.on_before_reset.as_ref(),
                after_recovery: s.on_after_recovery.as_ref(),
                after_discard: s.on_after_discard.as_ref(),
                fallback: &s.on_manual_reset_fallback,
            },
        }
    }
}

impl Default for ResetStrategy {
    fn default() -> Self {
        ResetStrategy::RecoverOrDiscard(RecoverOrDiscard::new(|_, error| {
            tracing::error!(
                code = error.error_code().code(),
                path = %error.original_file_path().display(),
                error = %error,
                "client reset: manual reset required"
            );
        }))
    }
}

impl fmt::Debug for ResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks();
        f.debug_struct(self.name())
            .field("before", &hooks.before.is_some())
            .field("after_recovery", &hooks.after_recovery.is_some())
            .field("after_discard", &hooks.after_discard.is_some())
            .finish()
    }
}

impl From<Manual> for ResetStrategy {
    fn from(strategy: Manual) -> Self {
        ResetStrategy::Manual(strategy)
    }
}

impl From<DiscardUnsynced> for ResetStrategy {
    fn from(strategy: DiscardUnsynced) -> Self {
        ResetStrategy::DiscardUnsynced(strategy)
    }
}

impl From<RecoverUnsynced> for ResetStrategy {
    fn from(strategy: RecoverUnsynced) -> Self {
        ResetStrategy::RecoverUnsynced(strategy)
    }
}

impl From<RecoverOrDiscard> for ResetStrategy {
    fn from(strategy: RecoverOrDiscard) -> Self {
        ResetStrategy::RecoverOrDiscard(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_table_maps_variant_hooks() {
        let strategy: ResetStrategy = DiscardUnsynced::new(|_, _| {})
            .with_after_reset(|_, _| Ok(()))
            .into();
        let hooks = strategy.hooks();
        assert_eq!(hooks.mode, Some(Mode::Discard));
        assert!(hooks.before.is_none());
        assert!(hooks.after_discard.is_some());
        assert!(hooks.after_recovery.is_none());

        let strategy: ResetStrategy = RecoverUnsynced::new(|_, _| {})
            .with_before_reset(|_| Ok(()))
            .with_after_reset(|_, _| Ok(()))
            .into();
        let hooks = strategy.hooks();
        assert_eq!(hooks.mode, Some(Mode::Recover));
        assert!(hooks.before.is_some());
        assert!(hooks.after_recovery.is_some());
        assert!(hooks.after_discard.is_none());
    }

    #[test]
    fn names_and_debug() {
        let strategy: ResetStrategy = Manual::new(|_, _| {}).into();
        assert_eq!(strategy.name(), "Manual");
        assert_eq!(ResetStrategy::default().name(), "RecoverOrDiscard");
        assert!(format!("{strategy:?}").starts_with("Manual"));
    }
}
