//! Client-side keystroke debouncer.
//!
//! Only transitions are emitted: `true` on the first keystroke after idle,
//! `false` once no keystroke arrived for the idle interval (or on `stop`).
//! The WebSocket session runs one per connection and forwards each emitted
//! value to [`PresenceTracker::set_typing`](super::PresenceTracker::set_typing).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

#[derive(Default)]
struct DebounceState {
    typing: bool,
    /// Bumped on every keystroke so a stale timer never emits
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct TypingDebouncer {
    idle: Duration,
    tx: UnboundedSender<bool>,
    state: Arc<Mutex<DebounceState>>,
}

fn lock(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> (Self, UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                idle,
                tx,
                state: Arc::new(Mutex::new(DebounceState::default())),
            },
            rx,
        )
    }

    pub fn is_typing(&self) -> bool {
        lock(&self.state).typing
    }

    /// Register a keystroke and re-arm the idle timer.
    pub fn keystroke(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;

        if !state.typing {
            state.typing = true;
            let _ = self.tx.send(true);
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let idle = self.idle;
        let tx = self.tx.clone();
        let shared = Arc::clone(&self.state);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut state = lock(&shared);
            if state.generation == generation && state.typing {
                state.typing = false;
                state.timer = None;
                let _ = tx.send(false);
            }
        }));
    }

    /// Emit `false` now if typing.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.typing {
            state.typing = false;
            let _ = self.tx.send(false);
        }
    }

    /// Release the timer without emitting anything.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
