use anyhow::Result;
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::display::DisplayHandleFactory;
use crate::gallery::{GalleryController, GallerySummary};
use crate::visibility::Viewport;

/// Drives a mounted gallery until its view goes away.
///
/// Rules:
/// - Every viewport change re-evaluates which assets are near the viewport.
/// - Fetch completions are applied as they resolve, in completion order.
/// - All state transitions happen on this task, one at a time.
/// - The gallery is torn down when `cancel` fires or the viewport sender is
///   dropped (the view unmounted); outstanding fetches are abandoned and
///   every live handle is released.
#[instrument(skip_all, fields(assets = controller.len()))]
pub async fn run<F: DisplayHandleFactory>(
    mut controller: GalleryController<F>,
    mut viewport_rx: watch::Receiver<Viewport>,
    cancel: CancellationToken,
) -> Result<GallerySummary> {
    let initial = *viewport_rx.borrow_and_update();
    controller.update_viewport(initial);

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!("cancel received; unmounting gallery");
                break;
            }

            changed = viewport_rx.changed() => {
                if changed.is_err() {
                    debug!("viewport closed; unmounting gallery");
                    break;
                }
                let viewport = *viewport_rx.borrow_and_update();
                controller.update_viewport(viewport);
            }

            _ = controller.process_next_fetch(), if controller.in_flight() > 0 => {}
        }
    }

    let summary = controller.finish();
    info!(
        loaded = summary.loaded,
        failed = summary.failed,
        released = summary.released_on_teardown,
        "gallery unmounted"
    );
    Ok(summary)
}
