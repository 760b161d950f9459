//! The client reset state machine.

use crate::error::ErrorCode;
use crate::reset::context::ResetContext;
use crate::reset::error::{CallbackPanicked, ClientResetRequiredError, RecoveryFailure};
use crate::reset::integration::IntegrationEngine;
use crate::reset::strategy::{AfterHook, FallbackHook, HookError, HookResult, Mode, ResetStrategy};
use crate::session::SyncSession;
use driftdb_core::{Database, FrozenView, RebaseReport};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// States of one reset episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    /// No episode running.
    Idle,
    /// A reset-class error was received.
    Detected,
    /// The before hook is running on a frozen snapshot.
    BeforeCallback,
    /// Unsynced changes are being replayed onto the server state.
    AttemptRecovery,
    /// Unsynced changes are being dropped.
    SkipRecovery,
    /// The database was rebased with unsynced changes kept.
    Recovered,
    /// The database was rebased with unsynced changes dropped.
    Discarded,
    /// The application has to finish the reset.
    Fallback,
}

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Unsynced changes were kept.
    Recovered,
    /// Unsynced changes were dropped.
    Discarded,
    /// The reset was handed to the fallback hook.
    ManualFallbackRequired,
    /// A strategy hook failed; the fallback hook ran.
    UserCallbackFailed,
}

/// Record of one finished episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    /// How the episode ended.
    pub outcome: ResetOutcome,
    /// Every state visited, starting and ending with `Idle`.
    pub transitions: Vec<ResetState>,
    /// The rebase performed, if one was.
    pub rebase: Option<RebaseReport>,
}

struct Episode {
    transitions: Vec<ResetState>,
    rebase: Option<RebaseReport>,
}

impl Episode {
    fn new() -> Self {
        Self {
            transitions: vec![ResetState::Idle],
            rebase: None,
        }
    }

    fn enter(&mut self, state: ResetState) {
        tracing::trace!(?state, "client reset transition");
        self.transitions.push(state);
    }

    fn finish(mut self, outcome: ResetOutcome) -> ResetReport {
        self.enter(ResetState::Idle);
        ResetReport {
            outcome,
            transitions: self.transitions,
            rebase: self.rebase,
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs client reset episodes for one database.
///
/// Every hook runs on the calling thread. Hook errors and panics never
/// escape: they end the episode in the fallback hook. At most one episode
/// runs at a time; a reset requested while one is running is dropped.
pub struct ResetExecutor {
    db: Database,
    strategy: Arc<ResetStrategy>,
    engine: Arc<dyn IntegrationEngine>,
    in_flight: AtomicBool,
}

impl ResetExecutor {
    /// Creates an executor.
    pub fn new(
        db: Database,
        strategy: Arc<ResetStrategy>,
        engine: Arc<dyn IntegrationEngine>,
    ) -> Self {
        Self {
            db,
            strategy,
            engine,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Returns true while an episode runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs one episode for `ctx`, reporting to hooks through `session`.
    ///
    /// Returns `None` if another episode was already running.
    pub fn run(&self, session: &SyncSession, ctx: ResetContext) -> Option<ResetReport> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                code = ctx.error_code().code(),
                "client reset already in progress; dropping reset error"
            );
            return None;
        }
        let _in_flight = InFlight(&self.in_flight);

        let mut episode = Episode::new();
        episode.enter(ResetState::Detected);
        tracing::info!(
            code = ctx.error_code().code(),
            strategy = self.strategy.name(),
            path = %ctx.original_path().display(),
            "client reset detected"
        );

        let outcome = self.execute(session, ctx, &mut episode);
        tracing::debug!(?outcome, "client reset finished");
        Some(episode.finish(outcome))
    }

    fn execute(
        &self,
        session: &SyncSession,
        ctx: ResetContext,
        episode: &mut Episode,
    ) -> ResetOutcome {
        let hooks = self.strategy.hooks();

        let Some(mode) = hooks.mode else {
            tracing::warn!(
                code = ctx.error_code().code(),
                "client reset: manual reset required"
            );
            let error = ClientResetRequiredError::from_context(ctx);
            return fallback(
                session,
                hooks.fallback,
                &error,
                episode,
                ResetOutcome::ManualFallbackRequired,
            );
        };

        if ctx.error_code() == ErrorCode::AutoClientResetFailure {
            tracing::warn!(
                server_message = ctx.message(),
                "client reset: automatic recovery failed"
            );
            let error = ClientResetRequiredError::auto_reset_failed(ctx, None);
            return fallback(
                session,
                hooks.fallback,
                &error,
                episode,
                ResetOutcome::ManualFallbackRequired,
            );
        }

        episode.enter(ResetState::BeforeCallback);
        let before = match self.db.frozen() {
            Ok(before) => before,
            Err(e) => {
                return self.recovery_failed(session, hooks.fallback, ctx, e.into(), episode);
            }
        };

        if let Some(hook) = hooks.before {
            if let Err(cause) = invoke(|| hook(&before)) {
                return self.callback_failed(session, hooks.fallback, ctx, cause, episode);
            }
        }

        let rebased = match mode {
            Mode::Discard => {
                episode.enter(ResetState::SkipRecovery);
                self.engine
                    .discard_local(&self.db, &ctx)
                    .map(|report| (report, ResetState::Discarded, hooks.after_discard))
            }
            Mode::Recover => {
                episode.enter(ResetState::AttemptRecovery);
                self.engine
                    .attempt_recovery(&self.db, &ctx)
                    .map(|report| (report, ResetState::Recovered, hooks.after_recovery))
            }
            Mode::RecoverOrDiscard => {
                episode.enter(ResetState::AttemptRecovery);
                match self.engine.attempt_recovery(&self.db, &ctx) {
                    Ok(report) => Ok((report, ResetState::Recovered, hooks.after_recovery)),
                    Err(failure) => {
                        tracing::warn!(
                            error = %failure,
                            "client reset: automatic recovery failed; discarding unsynced changes"
                        );
                        episode.enter(ResetState::SkipRecovery);
                        self.engine
                            .discard_local(&self.db, &ctx)
                            .map(|report| (report, ResetState::Discarded, hooks.after_discard))
                    }
                }
            }
        };

        let (report, state, after) = match rebased {
            Ok(rebased) => rebased,
            Err(failure) => {
                return self.recovery_failed(session, hooks.fallback, ctx, failure, episode);
            }
        };

        episode.rebase = Some(report);
        episode.enter(state);
        let outcome = if state == ResetState::Recovered {
            tracing::info!(
                replayed = report.replayed,
                server_version = report.server_version,
                "client reset: unsynced changes recovered"
            );
            ResetOutcome::Recovered
        } else {
            tracing::info!(
                discarded = report.discarded,
                server_version = report.server_version,
                "client reset: unsynced changes discarded"
            );
            ResetOutcome::Discarded
        };

        if let Some(hook) = after {
            if let Err(cause) = invoke(|| self.run_after(hook, &before)) {
                return self.callback_failed(session, hooks.fallback, ctx, cause, episode);
            }
        }
        outcome
    }

    fn run_after(&self, hook: &AfterHook, before: &FrozenView) -> HookResult {
        self.db.write(|after| hook(before, after))
    }

    fn recovery_failed(
        &self,
        session: &SyncSession,
        hook: &FallbackHook,
        ctx: ResetContext,
        failure: RecoveryFailure,
        episode: &mut Episode,
    ) -> ResetOutcome {
        tracing::warn!(error = %failure, "client reset: automatic recovery failed");
        let error = ClientResetRequiredError::auto_reset_failed(ctx, Some(Box::new(failure)));
        fallback(session, hook, &error, episode, ResetOutcome::ManualFallbackRequired)
    }

    fn callback_failed(
        &self,
        session: &SyncSession,
        hook: &FallbackHook,
        ctx: ResetContext,
        cause: HookError,
        episode: &mut Episode,
    ) -> ResetOutcome {
        tracing::error!(error = %cause, "client reset: user-provided callback failed");
        let error = ClientResetRequiredError::user_callback_failed(ctx, cause);
        fallback(session, hook, &error, episode, ResetOutcome::UserCallbackFailed)
    }
}

fn fallback(
    session: &SyncSession,
    hook: &FallbackHook,
    error: &ClientResetRequiredError,
    episode: &mut Episode,
    outcome: ResetOutcome,
) -> ResetOutcome {
    episode.enter(ResetState::Fallback);
    let restricted = session.restricted();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&restricted, error))) {
        tracing::error!(
            panic = %panic_message(payload.as_ref()),
            "client reset fallback hook panicked"
        );
    }
    outcome
}

/// Runs a hook, turning a panic into an error.
fn invoke<F>(hook: F) -> HookResult
where
    F: FnOnce() -> HookResult,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(Box::new(CallbackPanicked {
            message: panic_message(payload.as_ref()),
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
