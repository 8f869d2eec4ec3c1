//! Gallery manifests: the ordered list of encrypted assets and their native
//! dimensions, grouped into episodes by source-path prefix.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::Error;

const THUMBNAIL_PREFIX: &str = "thumbnail";

/// One loadable image as listed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Opaque address of the encrypted bytes, relative to the asset source.
    pub locator: String,
    pub width: u32,
    pub height: u32,
}

impl ManifestEntry {
    pub fn new(locator: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            locator: locator.into(),
            width,
            height,
        }
    }

    /// Build an entry for a thumbnail named `thumbnail-<W>-<H>.<ext>`.
    ///
    /// # Errors
    /// Returns [`Error::Manifest`] if the file name does not carry dimensions.
    pub fn from_thumbnail_locator(locator: &str) -> Result<Self, Error> {
        let file_name = locator.rsplit('/').next().unwrap_or(locator);
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or(file_name);
        let (width, height) = parse_thumbnail_dimensions(stem).ok_or_else(|| {
            Error::Manifest(format!("thumbnail name carries no dimensions: {locator}"))
        })?;
        Ok(Self::new(locator, width, height))
    }

    pub fn group_key(&self) -> &str {
        group_key(&self.locator)
    }

    pub fn native_dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Grouping key of a locator: the source-path prefix before the first `/`.
#[must_use]
pub fn group_key(locator: &str) -> &str {
    let trimmed = locator.trim_start_matches('/');
    trimmed.split('/').next().unwrap_or(trimmed)
}

fn parse_thumbnail_dimensions(stem: &str) -> Option<(u32, u32)> {
    let mut parts = stem.split('-');
    if parts.next()? != THUMBNAIL_PREFIX {
        return None;
    }
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some((width, height))
}

/// A run of consecutive entries sharing a group key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: String,
    pub range: Range<usize>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Metadata file stored next to a book's pages.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMeta {
    pub name: String,
    /// `[width, height]` per page, in page order.
    pub dimensions: Vec<[u32; 2]>,
}

/// Ordered, validated list of assets for one gallery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// # Errors
    /// Returns [`Error::Manifest`] for empty or duplicate locators.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.locator.trim().is_empty() {
                return Err(Error::Manifest("entry with empty locator".into()));
            }
            if !seen.insert(entry.locator.as_str()) {
                return Err(Error::Manifest(format!(
                    "duplicate locator {}",
                    entry.locator
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let entries: Vec<ManifestEntry> = serde_json::from_str(raw)?;
        Self::from_entries(entries)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Pair a book's page files with the dimensions from its metadata.
    ///
    /// Metadata files and thumbnails are not pages. Pages are ordered by
    /// locator and matched to `meta.dimensions` by position.
    ///
    /// # Errors
    /// Returns [`Error::Manifest`] if the page and dimension counts differ.
    pub fn book<I>(meta: &BookMeta, locators: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = String>,
    {
        let mut pages: Vec<String> = locators.into_iter().filter(|l| is_page(l)).collect();
        pages.sort();
        if pages.len() != meta.dimensions.len() {
            return Err(Error::Manifest(format!(
                "book {} lists {} dimensions for {} pages",
                meta.name,
                meta.dimensions.len(),
                pages.len()
            )));
        }
        let entries = pages
            .into_iter()
            .zip(&meta.dimensions)
            .map(|(locator, [w, h])| ManifestEntry::new(locator, *w, *h))
            .collect();
        Self::from_entries(entries)
    }

    /// Collect every `thumbnail-<W>-<H>.*` file below `root`.
    ///
    /// Locators are `/`-separated paths relative to `root`, ordered by
    /// directory and then by file name.
    pub fn scan_thumbnails(root: &Path) -> Result<Self, Error> {
        ensure_dir(root)?;
        let mut found: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(is_thumbnail)
        {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let dir = rel.parent().map(Path::to_path_buf).unwrap_or_default();
            found.push((dir, to_locator(rel)));
        }
        found.sort();
        let entries = found
            .iter()
            .map(|(_, locator)| ManifestEntry::from_thumbnail_locator(locator))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(root = %root.display(), count = entries.len(), "scanned thumbnails");
        Self::from_entries(entries)
    }

    /// Read the book stored in `<root>/<name>/`.
    ///
    /// The metadata is the JSON file in that directory whose `name` field
    /// equals `name`.
    pub fn scan_book(root: &Path, name: &str) -> Result<Self, Error> {
        let dir = root.join(name);
        ensure_dir(&dir)?;
        let mut meta = None;
        let mut locators = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if has_extension(path, "json") {
                let raw = std::fs::read_to_string(path)?;
                let candidate: BookMeta = serde_json::from_str(&raw)?;
                if candidate.name == name {
                    meta = Some(candidate);
                }
                continue;
            }
            let rel = path.strip_prefix(root).unwrap_or(path);
            locators.push(to_locator(rel));
        }
        let meta = meta.ok_or_else(|| {
            Error::Manifest(format!("no metadata for book {name} in {}", dir.display()))
        })?;
        Self::book(&meta, locators)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ManifestEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split the entries into runs of equal group key, preserving order.
    ///
    /// A key that reappears after a different one starts a new group.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            let key = entry.group_key();
            match groups.last_mut() {
                Some(last) if last.key == key => last.range.end = idx + 1,
                _ => groups.push(Group {
                    key: key.to_string(),
                    range: idx..idx + 1,
                }),
            }
        }
        groups
    }
}

fn ensure_dir(dir: &Path) -> Result<(), Error> {
    if !dir.is_dir() {
        return Err(Error::Manifest(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    Ok(())
}

fn is_thumbnail(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with(THUMBNAIL_PREFIX))
}

fn is_page(locator: &str) -> bool {
    let file_name = locator.rsplit('/').next().unwrap_or(locator);
    !file_name.starts_with(THUMBNAIL_PREFIX) && !has_extension(Path::new(file_name), "json")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn to_locator(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
