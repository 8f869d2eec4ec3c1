use crate::error::LoadFailure;

/// Notifications emitted by a gallery as its assets change state.
///
/// Every variant carries the asset's index in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEvent {
    /// The one network fetch for this asset was issued.
    FetchStarted { index: usize },
    /// Fetch and decrypt succeeded; `bytes` is the plaintext length.
    Loaded { index: usize, bytes: usize },
    /// The asset reached a terminal failure and stays blank.
    Failed { index: usize, failure: LoadFailure },
    /// A display handle was created because the asset is near the viewport.
    Shown { index: usize },
    /// The display handle was released because the asset left the viewport.
    Hidden { index: usize },
    /// Materializing the display handle failed; retried on the next entry.
    HandleFailed { index: usize, reason: String },
    /// The display handle was released because the gallery was torn down.
    Released { index: usize },
}

impl AssetEvent {
    pub fn index(&self) -> usize {
        match self {
            Self::FetchStarted { index }
            | Self::Loaded { index, .. }
            | Self::Failed { index, .. }
            | Self::Shown { index }
            | Self::Hidden { index }
            | Self::HandleFailed { index, .. }
            | Self::Released { index } => *index,
        }
    }
}
