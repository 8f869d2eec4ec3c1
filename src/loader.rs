//! Per-asset loading state machine.
//!
//! An asset is fetched and decrypted at most once, then gets a display handle
//! every time it comes near the viewport and gives it back when it leaves:
//!
//! ```text
//! Idle --visible--> Fetching --ok--> Fetched
//!                      |
//!                      +--exhausted / bad ciphertext--> FetchFailed --rearm--> Idle
//! ```
//!
//! Orthogonal to the fetch state, the loader tracks `visible` and whether it
//! holds a handle. A handle exists only while the asset is visible and its
//! plaintext is present. Network I/O is not performed here: arming the fetch
//! yields a [`FetchTicket`] that the owner runs and later feeds back through
//! [`AssetLoader::complete_fetch`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::crypto::Decryptor;
use crate::display::DisplayHandleFactory;
use crate::error::{Error, LoadFailure};
use crate::manifest::ManifestEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Fetched,
    FetchFailed,
}

/// Permission to run the single fetch of an armed loader.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    pub locator: String,
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// What a call into the loader changed.
#[derive(Debug, PartialEq)]
pub enum Transition {
    /// The latch fired; the ticket must be run exactly once.
    Fetch(FetchTicket),
    Loaded { bytes: usize },
    Failed(LoadFailure),
    Shown,
    Hidden,
    HandleFailed(String),
}

impl PartialEq for FetchTicket {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator && self.generation == other.generation
    }
}

pub struct AssetLoader<F: DisplayHandleFactory> {
    entry: ManifestEntry,
    state: FetchState,
    plaintext: Option<Arc<[u8]>>,
    handle: Option<F::Handle>,
    visible: bool,
    failure: Option<LoadFailure>,
    generation: u64,
    pending: Option<CancellationToken>,
    cancel: CancellationToken,
    destroyed: bool,
    decryptor: Arc<dyn Decryptor>,
    factory: Arc<F>,
}

impl<F: DisplayHandleFactory> AssetLoader<F> {
    /// `cancel` is the parent of every fetch this loader arms; cancelling it
    /// abandons them all.
    pub fn new(
        entry: ManifestEntry,
        decryptor: Arc<dyn Decryptor>,
        factory: Arc<F>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            entry,
            state: FetchState::Idle,
            plaintext: None,
            handle: None,
            visible: false,
            failure: None,
            generation: 0,
            pending: None,
            cancel,
            destroyed: false,
            decryptor,
            factory,
        }
    }

    pub fn entry(&self) -> &ManifestEntry {
        &self.entry
    }

    pub fn locator(&self) -> &str {
        &self.entry.locator
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&F::Handle> {
        self.handle.as_ref()
    }

    pub fn plaintext(&self) -> Option<&Arc<[u8]>> {
        self.plaintext.as_ref()
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        self.failure.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Apply a visibility signal. Repeating the current value is a no-op.
    pub fn set_visible(&mut self, visible: bool) -> Vec<Transition> {
        let mut out = Vec::new();
        if self.destroyed || self.visible == visible {
            return out;
        }
        self.visible = visible;

        if visible {
            match self.state {
                FetchState::Idle => out.push(Transition::Fetch(self.arm())),
                FetchState::Fetched => self.materialize(&mut out),
                FetchState::Fetching | FetchState::FetchFailed => {}
            }
        } else if let Some(handle) = self.handle.take() {
            self.factory.release(handle);
            debug!(locator = %self.entry.locator, "handle released on exit");
            out.push(Transition::Hidden);
        }
        out
    }

    /// Feed back the result of the fetch started by the ticket of `generation`.
    ///
    /// Results for an older ticket, for a loader that is no longer fetching,
    /// or for a destroyed loader are discarded.
    pub fn complete_fetch(
        &mut self,
        generation: u64,
        result: Result<Vec<u8>, Error>,
    ) -> Vec<Transition> {
        let mut out = Vec::new();
        if self.destroyed || generation != self.generation || self.state != FetchState::Fetching
        {
            trace!(
                locator = %self.entry.locator,
                generation,
                current = self.generation,
                "discarding stale fetch result"
            );
            return out;
        }
        self.pending = None;

        match result {
            Ok(ciphertext) => match self.decryptor.decrypt(&ciphertext) {
                Ok(plaintext) => {
                    let bytes = plaintext.len();
                    self.plaintext = Some(Arc::from(plaintext));
                    self.state = FetchState::Fetched;
                    debug!(locator = %self.entry.locator, bytes, "asset decrypted");
                    out.push(Transition::Loaded { bytes });
                    if self.visible {
                        self.materialize(&mut out);
                    }
                }
                Err(err) => self.fail(LoadFailure::Decryption(err.to_string()), &mut out),
            },
            Err(Error::FetchCancelled(_)) => {
                debug!(locator = %self.entry.locator, "fetch cancelled; back to idle");
                self.state = FetchState::Idle;
            }
            Err(err @ Error::FetchAborted { .. }) => {
                self.fail(LoadFailure::FetchAborted(err.to_string()), &mut out)
            }
            Err(err) => self.fail(LoadFailure::FetchExhausted(err.to_string()), &mut out),
        }
        out
    }

    /// Deliberately re-open the fetch latch of a failed asset.
    ///
    /// If the asset is visible the new fetch is armed right away.
    pub fn rearm(&mut self) -> Vec<Transition> {
        let mut out = Vec::new();
        if self.destroyed || self.state != FetchState::FetchFailed {
            return out;
        }
        self.failure = None;
        self.state = FetchState::Idle;
        if self.visible {
            out.push(Transition::Fetch(self.arm()));
        }
        out
    }

    /// Cancel any pending fetch and release the handle, if held.
    ///
    /// Returns whether a handle was released. Later calls do nothing.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.visible = false;
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => {
                self.factory.release(handle);
                true
            }
            None => false,
        }
    }

    fn arm(&mut self) -> FetchTicket {
        self.generation += 1;
        self.state = FetchState::Fetching;
        let token = self.cancel.child_token();
        self.pending = Some(token.clone());
        debug!(locator = %self.entry.locator, generation = self.generation, "fetch armed");
        FetchTicket {
            locator: self.entry.locator.clone(),
            generation: self.generation,
            cancel: token,
        }
    }

    fn materialize(&mut self, out: &mut Vec<Transition>) {
        if self.handle.is_some() || !self.visible {
            return;
        }
        let Some(plaintext) = self.plaintext.as_ref() else {
            return;
        };
        match self.factory.create(plaintext) {
            Ok(handle) => {
                self.handle = Some(handle);
                out.push(Transition::Shown);
            }
            Err(err) => {
                warn!(locator = %self.entry.locator, error = %err, "could not create display handle");
                out.push(Transition::HandleFailed(err.to_string()));
            }
        }
    }

    fn fail(&mut self, failure: LoadFailure, out: &mut Vec<Transition>) {
        warn!(locator = %self.entry.locator, %failure, "asset failed");
        self.state = FetchState::FetchFailed;
        self.failure = Some(failure.clone());
        out.push(Transition::Failed(failure));
    }
}

impl<F: DisplayHandleFactory> Drop for AssetLoader<F> {
    fn drop(&mut self) {
        self.destroy();
    }
}
