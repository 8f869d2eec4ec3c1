use anyhow::{Result, ensure};
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ScrollOptions;
use crate::visibility::Viewport;

/// Scrolls from the top of a gallery to its bottom, then lingers.
///
/// Dropping `viewport_tx` on return tells the gallery its view is gone.
pub async fn run(
    viewport_tx: watch::Sender<Viewport>,
    content_height: f32,
    opts: ScrollOptions,
    cancel: CancellationToken,
) -> Result<()> {
    ensure!(!opts.interval.is_zero(), "scroll interval must be positive");
    let height = viewport_tx.borrow().height;
    let step = (opts.step * height).max(1.0);
    let last_top = (content_height - height).max(0.0);
    let mut ticker = interval(opts.interval);
    let mut top = viewport_tx.borrow().top;

    while top < last_top {
        select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                top = (top + step).min(last_top);
                debug!(top, "scroll");
                viewport_tx.send_replace(Viewport::new(top, height));
            }
        }
    }

    select! {
        _ = cancel.cancelled() => {}
        _ = sleep(opts.linger) => {}
    }
    Ok(())
}
