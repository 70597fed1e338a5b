//! At most one execution of an action at a time.
//!
//! A [`SingleFlight`] starts the action for the first caller and hands every caller that arrives
//! while it runs the same result. Its progress is published on a [`watch`] channel so screens can
//! render loading and error states without holding the future.

use std::{
    fmt,
    future::Future,
    sync::{Mutex, PoisonError},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::debug;

/// Progress of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState<T, E> {
    /// Never run, or reset since the last result.
    Empty,

    /// Running.
    Loading,

    /// The last run succeeded.
    Value(T),

    /// The last run failed.
    Error(E),
}

impl<T, E> ActionState<T, E> {
    /// Whether a run is in progress.
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Runs an action at most once concurrently.
pub struct SingleFlight<T, E> {
    in_flight: Mutex<Option<InFlight<T, E>>>,
    state: watch::Sender<ActionState<T, E>>,
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("loading", &self.state.borrow().is_loading())
            .finish_non_exhaustive()
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// An idle guard in the [`ActionState::Empty`] state.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
            state: watch::Sender::new(ActionState::Empty),
        }
    }

    /// Runs the future built by `start`, or joins the run already in progress.
    ///
    /// `start` is only called when nothing is in flight.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.as_ref() {
                Some(flight) => {
                    debug!("joining in-flight action");
                    flight.clone()
                }
                None => {
                    let flight = start().boxed().shared();
                    *in_flight = Some(flight.clone());
                    self.state.send_replace(ActionState::Loading);
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&flight))
        {
            *in_flight = None;
            self.state.send_replace(match &result {
                Ok(value) => ActionState::Value(value.clone()),
                Err(error) => ActionState::Error(error.clone()),
            });
        }

        result
    }

    /// Observes state changes.
    pub fn subscribe(&self) -> watch::Receiver<ActionState<T, E>> {
        self.state.subscribe()
    }

    /// The current state.
    pub fn state(&self) -> ActionState<T, E> {
        self.state.borrow().clone()
    }

    /// Clears a published result. A run in progress is left alone.
    pub fn reset(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, ActionState::Loading | ActionState::Empty) {
                return false;
            }
            *state = ActionState::Empty;
            true
        });
    }
}
