//! Proximity of laid-out assets to the viewport.

use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;

/// The visible window, in layout pixels from the top of the gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(top: f32, height: f32) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Vertical extent reserved for one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub top: f32,
    pub height: f32,
}

impl Span {
    pub const fn new(top: f32, height: f32) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// How far outside the viewport still counts as visible, in multiples of
/// the viewport height.
///
/// `look_behind` extends above the viewport (already read), `look_ahead`
/// below it (about to be read).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarginPolicy {
    pub look_behind: f32,
    pub look_ahead: f32,
}

impl MarginPolicy {
    pub const fn new(look_behind: f32, look_ahead: f32) -> Self {
        Self {
            look_behind,
            look_ahead,
        }
    }

    pub const fn symmetric(margin: f32) -> Self {
        Self::new(margin, margin)
    }

    /// Thumbnail grids render well ahead of the scroll in both directions.
    pub const fn thumbnail_grid() -> Self {
        Self::symmetric(5.0)
    }

    /// Page readers favour the forward reading direction.
    pub const fn page_reader() -> Self {
        Self::new(2.5, 5.0)
    }

    /// The viewport grown by this margin, as `(top, bottom)`.
    pub fn expand(&self, viewport: Viewport) -> (f32, f32) {
        let h = viewport.height.max(0.0);
        (
            viewport.top - self.look_behind * h,
            viewport.bottom() + self.look_ahead * h,
        )
    }
}

/// Whether `span` lies within `margin` of `viewport`. Touching edges count.
#[must_use]
pub fn is_near(span: Span, viewport: Viewport, margin: MarginPolicy) -> bool {
    let (top, bottom) = margin.expand(viewport);
    span.top <= bottom && span.bottom() >= top
}

/// Reports visibility transitions of elements against a shared viewport.
///
/// This is the per-element adapter for embedders that mount each asset as
/// its own view and forward transitions to
/// [`GalleryController::set_visible`](crate::gallery::GalleryController::set_visible).
/// [`crate::tasks::gallery::run`] instead evaluates the whole layout per
/// viewport change through [`is_near`]; both apply the same rule.
#[derive(Debug, Clone)]
pub struct VisibilityDetector {
    viewport: watch::Receiver<Viewport>,
}

impl VisibilityDetector {
    pub fn new(viewport: watch::Receiver<Viewport>) -> Self {
        Self { viewport }
    }

    pub fn current(&self) -> Viewport {
        *self.viewport.borrow()
    }

    /// Visibility of `span` as a stream of transitions.
    ///
    /// The first item is the state against the current viewport; later items
    /// are emitted only when the state flips. Each call starts a fresh
    /// stream, which ends once the viewport sender is dropped.
    pub fn detect(&self, span: Span, margin: MarginPolicy) -> BoxStream<'static, bool> {
        let mut rx = self.viewport.clone();
        rx.mark_changed();
        stream::unfold((rx, None::<bool>), move |(mut rx, last)| async move {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let near = is_near(span, *rx.borrow_and_update(), margin);
                if last != Some(near) {
                    return Some((near, (rx, Some(near))));
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_margin_looks_further_ahead_than_behind() {
        let viewport = Viewport::new(10_000.0, 1_000.0);
        let margin = MarginPolicy::page_reader();

        // 4 viewport heights below the bottom edge: inside look-ahead.
        assert!(is_near(Span::new(15_000.0, 500.0), viewport, margin));
        // 4 viewport heights above the top edge: outside look-behind.
        assert!(!is_near(Span::new(5_500.0, 500.0), viewport, margin));
        // 2 viewport heights above: inside look-behind.
        assert!(is_near(Span::new(7_500.0, 500.0), viewport, margin));
    }

    #[test]
    fn thumbnail_margin_is_symmetric() {
        let viewport = Viewport::new(10_000.0, 1_000.0);
        let margin = MarginPolicy::thumbnail_grid();
        assert!(is_near(Span::new(5_500.0, 100.0), viewport, margin));
        assert!(is_near(Span::new(15_900.0, 100.0), viewport, margin));
        assert!(!is_near(Span::new(16_100.0, 100.0), viewport, margin));
        assert!(!is_near(Span::new(4_800.0, 100.0), viewport, margin));
    }

    #[test]
    fn zero_margin_matches_literal_viewport() {
        let viewport = Viewport::new(0.0, 100.0);
        let margin = MarginPolicy::symmetric(0.0);
        assert!(is_near(Span::new(50.0, 10.0), viewport, margin));
        assert!(is_near(Span::new(100.0, 10.0), viewport, margin));
        assert!(!is_near(Span::new(100.5, 10.0), viewport, margin));
    }

    #[tokio::test]
    async fn detect_emits_only_transitions() {
        let (tx, rx) = watch::channel(Viewport::new(0.0, 100.0));
        let detector = VisibilityDetector::new(rx);
        let span = Span::new(1_000.0, 50.0);
        let mut stream = detector.detect(span, MarginPolicy::symmetric(0.0));

        assert_eq!(stream.next().await, Some(false));

        // Still far away: no item; then into view.
        tx.send(Viewport::new(100.0, 100.0)).unwrap();
        tx.send(Viewport::new(980.0, 100.0)).unwrap();
        assert_eq!(stream.next().await, Some(true));

        tx.send(Viewport::new(990.0, 100.0)).unwrap();
        tx.send(Viewport::new(2_000.0, 100.0)).unwrap();
        assert_eq!(stream.next().await, Some(false));

        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn detect_restarts_from_current_viewport() {
        let (tx, rx) = watch::channel(Viewport::new(0.0, 100.0));
        let detector = VisibilityDetector::new(rx);
        let span = Span::new(20.0, 10.0);
        let margin = MarginPolicy::symmetric(0.0);

        let mut first = detector.detect(span, margin);
        assert_eq!(first.next().await, Some(true));
        drop(first);

        tx.send(Viewport::new(500.0, 100.0)).unwrap();
        let mut second = detector.detect(span, margin);
        assert_eq!(second.next().await, Some(false));
    }
}
