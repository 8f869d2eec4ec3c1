use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::fetch::RetryPolicy;
use crate::gallery::GalleryOptions;
use crate::layout::{LayoutOptions, ReadingMode};
use crate::visibility::MarginPolicy;

/// Where encrypted asset bytes come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// Read locators below `library-path`.
    #[default]
    Directory,
    #[serde(rename_all = "kebab-case")]
    Http { base_url: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CipherConfig {
    #[default]
    None,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm {
        /// Base64-encoded 32-byte key.
        key: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchOptions {
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub max_attempts: u32,
    /// Per-attempt timeout for HTTP sources.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl FetchOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: self.retry_delay,
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retry_delay: policy.delay,
            max_attempts: policy.max_attempts,
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewportOptions {
    pub width: f32,
    pub height: f32,
}

impl Default for ViewportOptions {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 900.0,
        }
    }
}

/// Per-context margin and grid settings; unset values fall back to the
/// context's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GallerySection {
    pub look_behind: Option<f32>,
    pub look_ahead: Option<f32>,
    pub columns: Option<usize>,
}

impl GallerySection {
    pub fn margin_or(&self, fallback: MarginPolicy) -> MarginPolicy {
        MarginPolicy::new(
            self.look_behind.unwrap_or(fallback.look_behind),
            self.look_ahead.unwrap_or(fallback.look_ahead),
        )
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        for (name, value) in [("look-behind", self.look_behind), ("look-ahead", self.look_ahead)] {
            if let Some(v) = value {
                ensure!(
                    v.is_finite() && v >= 0.0,
                    "{}.{} must be a non-negative number",
                    prefix,
                    name
                );
            }
        }
        if let Some(columns) = self.columns {
            ensure!(columns >= 1, "{}.columns must be at least 1", prefix);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DisplayOptions {
    /// Decode plaintext to pixels for every handle instead of registering blobs.
    pub decode: bool,
    /// Cap on registered blobs (blob mode).
    pub max_live_handles: Option<usize>,
    /// Cap on decoded pixel bytes alive at once (decode mode).
    pub max_live_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScrollOptions {
    /// Fraction of the viewport height scrolled per tick.
    pub step: f32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long to stay at the bottom before leaving the gallery.
    #[serde(with = "humantime_serde")]
    pub linger: Duration,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            step: 0.5,
            interval: Duration::from_millis(50),
            linger: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Local library root used by the directory source and by scans.
    pub library_path: PathBuf,
    pub source: SourceConfig,
    pub cipher: CipherConfig,
    pub fetch: FetchOptions,
    pub viewport: ViewportOptions,
    pub reading_mode: ReadingMode,
    pub thumbnails: GallerySection,
    pub pages: GallerySection,
    pub display: DisplayOptions,
    pub scroll: ScrollOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.fetch.max_attempts >= 1,
            "fetch.max-attempts must be at least 1"
        );
        ensure!(
            !self.fetch.request_timeout.is_zero(),
            "fetch.request-timeout must be positive"
        );
        ensure!(
            self.viewport.width.is_finite() && self.viewport.width > 0.0,
            "viewport.width must be positive"
        );
        ensure!(
            self.viewport.height.is_finite() && self.viewport.height > 0.0,
            "viewport.height must be positive"
        );
        ensure!(
            self.scroll.step.is_finite() && self.scroll.step > 0.0,
            "scroll.step must be positive"
        );
        ensure!(
            !self.scroll.interval.is_zero(),
            "scroll.interval must be positive"
        );
        self.thumbnails.validate("thumbnails")?;
        self.pages.validate("pages")?;
        if let SourceConfig::Http { base_url } = &self.source {
            reqwest::Url::parse(base_url)
                .with_context(|| format!("source.base-url is not a url: {base_url}"))?;
        }
        crate::crypto::from_config(&self.cipher).context("invalid cipher configuration")?;
        Ok(self)
    }

    /// Options for a thumbnail grid: symmetric margin, several columns.
    pub fn thumbnail_options(&self) -> GalleryOptions {
        GalleryOptions {
            margin: self.thumbnails.margin_or(MarginPolicy::thumbnail_grid()),
            layout: LayoutOptions {
                columns: self.thumbnails.columns.unwrap_or(4),
                content_width: self.viewport.width,
                reading_mode: ReadingMode::Width,
            },
        }
    }

    /// Options for a page reader: forward-biased margin, one column.
    pub fn page_options(&self) -> GalleryOptions {
        GalleryOptions {
            margin: self.pages.margin_or(MarginPolicy::page_reader()),
            layout: LayoutOptions {
                columns: self.pages.columns.unwrap_or(1),
                content_width: self.viewport.width,
                reading_mode: self.reading_mode,
            },
        }
    }
}
