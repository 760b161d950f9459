//! Client reset handling.
//!
//! A client reset starts when the server reports an error code in the reset
//! range. The [`ResetExecutor`] then runs one *episode*: it snapshots the
//! local data, rebases the database onto a fresh server baseline (keeping or
//! dropping unsynced writes, per the configured [`ResetStrategy`]), and
//! invokes exactly one terminal hook. Anything that cannot be handled
//! automatically ends in the strategy's fallback hook, which receives a
//! [`ClientResetRequiredError`] the application can use to move the local
//! file aside.

mod context;
mod error;
mod executor;
mod integration;
mod strategy;

pub use context::ResetContext;
pub use error::{
    move_to_recovery, CallbackPanicked, ClientResetRequiredError, RecoveryFailure,
    AUTO_RESET_FAILED_MESSAGE, USER_CALLBACK_FAILED_MESSAGE,
};
pub use executor::{ResetExecutor, ResetOutcome, ResetReport, ResetState};
pub use integration::{IntegrationEngine, RebaseIntegrator};
pub use strategy::{
    AfterHook, BeforeHook, DiscardUnsynced, FallbackHook, HookError, HookResult, Manual,
    RecoverOrDiscard, RecoverUnsynced, ResetStrategy,
};
