//! A gallery of asset loaders laid out under one visibility margin policy.
//!
//! The controller is the single owner of every loader's state: visibility
//! signals and fetch completions are applied one at a time through `&mut
//! self`. Only the network fetches run concurrently, as tasks in a
//! [`JoinSet`] whose results are fed back by [`GalleryController::process_next_fetch`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crypto::Decryptor;
use crate::display::DisplayHandleFactory;
use crate::error::Error;
use crate::events::AssetEvent;
use crate::fetch::RetryingFetcher;
use crate::layout::{Layout, LayoutOptions};
use crate::loader::{AssetLoader, FetchState, FetchTicket, Transition};
use crate::manifest::{Group, Manifest};
use crate::visibility::{MarginPolicy, Viewport, is_near};

/// Per-gallery visibility and layout configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalleryOptions {
    pub margin: MarginPolicy,
    pub layout: LayoutOptions,
}

/// Counts reported after a gallery is torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GallerySummary {
    pub assets: usize,
    pub loaded: usize,
    pub failed: usize,
    pub released_on_teardown: usize,
}

pub struct GalleryController<F: DisplayHandleFactory> {
    manifest: Manifest,
    layout: Layout,
    margin: MarginPolicy,
    loaders: Vec<AssetLoader<F>>,
    fetcher: RetryingFetcher,
    tasks: JoinSet<Result<Vec<u8>, Error>>,
    /// Asset index and ticket generation of every spawned fetch.
    pending: HashMap<task::Id, (usize, u64)>,
    cancel: CancellationToken,
    events: Option<UnboundedSender<AssetEvent>>,
    torn_down: bool,
}

impl<F: DisplayHandleFactory> GalleryController<F> {
    pub fn new(
        manifest: Manifest,
        options: GalleryOptions,
        fetcher: RetryingFetcher,
        decryptor: Arc<dyn Decryptor>,
        factory: Arc<F>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let layout = Layout::compute(&manifest, &options.layout);
        let loaders = manifest
            .entries()
            .iter()
            .map(|entry| {
                AssetLoader::new(
                    entry.clone(),
                    Arc::clone(&decryptor),
                    Arc::clone(&factory),
                    cancel.child_token(),
                )
            })
            .collect();
        debug!(
            assets = manifest.len(),
            height = layout.total_height(),
            margin = ?options.margin,
            "gallery constructed"
        );
        Self {
            manifest,
            layout,
            margin: options.margin,
            loaders,
            fetcher,
            tasks: JoinSet::new(),
            pending: HashMap::new(),
            cancel,
            events: None,
            torn_down: false,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<AssetEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn loader(&self, index: usize) -> Option<&AssetLoader<F>> {
        self.loaders.get(index)
    }

    pub fn loaders(&self) -> &[AssetLoader<F>] {
        &self.loaders
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn groups(&self) -> Vec<Group> {
        self.manifest.groups()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn margin(&self) -> MarginPolicy {
        self.margin
    }

    /// Fetches issued and not yet fed back.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn live_handles(&self) -> usize {
        self.loaders.iter().filter(|l| l.has_handle()).count()
    }

    /// Deliver a visibility signal for one asset.
    ///
    /// Must be called from within a Tokio runtime: arming a fetch spawns it.
    pub fn set_visible(&mut self, index: usize, visible: bool) {
        if self.torn_down {
            return;
        }
        let Some(loader) = self.loaders.get_mut(index) else {
            warn!(index, "visibility signal for unknown asset");
            return;
        };
        let transitions = loader.set_visible(visible);
        self.dispatch(index, transitions);
    }

    /// Re-evaluate every asset against `viewport`, signalling only the ones
    /// whose visibility changed.
    pub fn update_viewport(&mut self, viewport: Viewport) {
        if self.torn_down {
            return;
        }
        for index in 0..self.loaders.len() {
            let Some(span) = self.layout.span(index) else {
                continue;
            };
            let near = is_near(span, viewport, self.margin);
            if near != self.loaders[index].is_visible() {
                self.set_visible(index, near);
            }
        }
    }

    /// Manually retry one failed asset.
    pub fn rearm(&mut self, index: usize) {
        if self.torn_down {
            return;
        }
        if let Some(loader) = self.loaders.get_mut(index) {
            let transitions = loader.rearm();
            self.dispatch(index, transitions);
        }
    }

    /// Manually retry every failed asset; returns how many were re-armed.
    pub fn rearm_failed(&mut self) -> usize {
        let failed: Vec<usize> = self
            .loaders
            .iter()
            .enumerate()
            .filter(|(_, l)| l.state() == FetchState::FetchFailed)
            .map(|(i, _)| i)
            .collect();
        for &index in &failed {
            self.rearm(index);
        }
        failed.len()
    }

    /// Wait for the next fetch to resolve and apply it.
    ///
    /// Returns `false` when nothing is in flight.
    pub async fn process_next_fetch(&mut self) -> bool {
        let (id, result) = match self.tasks.join_next_with_id().await {
            Some(Ok((id, result))) => (id, result),
            Some(Err(err)) => {
                let id = err.id();
                if err.is_cancelled() {
                    self.pending.remove(&id);
                    return true;
                }
                warn!(error = %err, "fetch task failed");
                let locator = self
                    .pending
                    .get(&id)
                    .and_then(|(index, _)| self.loaders.get(*index))
                    .map(|l| l.locator().to_string())
                    .unwrap_or_default();
                let reason = if err.is_panic() {
                    "fetch task panicked".to_string()
                } else {
                    err.to_string()
                };
                (id, Err(Error::FetchAborted { locator, reason }))
            }
            None => return false,
        };
        let Some((index, generation)) = self.pending.remove(&id) else {
            return true;
        };
        if let Some(loader) = self.loaders.get_mut(index) {
            let transitions = loader.complete_fetch(generation, result);
            self.dispatch(index, transitions);
        }
        true
    }

    /// Apply fetch results until none are in flight.
    pub async fn settle(&mut self) {
        while self.process_next_fetch().await {}
    }

    /// Cancel outstanding fetches and release every live handle.
    ///
    /// Returns the number of handles released. Idempotent.
    pub fn teardown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        self.cancel.cancel();
        self.tasks.abort_all();
        self.pending.clear();
        let mut released = 0;
        for (index, loader) in self.loaders.iter_mut().enumerate() {
            if loader.destroy() {
                released += 1;
                emit(&self.events, AssetEvent::Released { index });
            }
        }
        info!(released, "gallery torn down");
        released
    }

    /// Tear down and report what happened over the gallery's lifetime.
    pub fn finish(mut self) -> GallerySummary {
        let loaded = self
            .loaders
            .iter()
            .filter(|l| l.state() == FetchState::Fetched)
            .count();
        let failed = self
            .loaders
            .iter()
            .filter(|l| l.state() == FetchState::FetchFailed)
            .count();
        let released_on_teardown = self.teardown();
        GallerySummary {
            assets: self.loaders.len(),
            loaded,
            failed,
            released_on_teardown,
        }
    }

    fn dispatch(&mut self, index: usize, transitions: Vec<Transition>) {
        for transition in transitions {
            let event = match transition {
                Transition::Fetch(ticket) => {
                    self.spawn_fetch(index, ticket);
                    AssetEvent::FetchStarted { index }
                }
                Transition::Loaded { bytes } => AssetEvent::Loaded { index, bytes },
                Transition::Failed(failure) => AssetEvent::Failed { index, failure },
                Transition::Shown => AssetEvent::Shown { index },
                Transition::Hidden => AssetEvent::Hidden { index },
                Transition::HandleFailed(reason) => AssetEvent::HandleFailed { index, reason },
            };
            emit(&self.events, event);
        }
    }

    fn spawn_fetch(&mut self, index: usize, ticket: FetchTicket) {
        let fetcher = self.fetcher.clone();
        let FetchTicket {
            locator,
            generation,
            cancel,
        } = ticket;
        let handle = self
            .tasks
            .spawn(async move { fetcher.fetch(&locator, &cancel).await });
        self.pending.insert(handle.id(), (index, generation));
    }
}

impl<F: DisplayHandleFactory> Drop for GalleryController<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn emit(events: &Option<UnboundedSender<AssetEvent>>, event: AssetEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
