//! Display handles: transient, revocable renderables backed by plaintext.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::Error;

/// Creates renderable handles from plaintext and reclaims them.
///
/// `release` takes the handle by value, so each handle can be released at
/// most once. Keeping every created handle balanced by exactly one release
/// is the caller's job.
pub trait DisplayHandleFactory: Send + Sync {
    type Handle: Send + 'static;

    fn create(&self, plaintext: &Arc<[u8]>) -> Result<Self::Handle, Error>;

    fn release(&self, handle: Self::Handle);
}

/// A registered plaintext buffer addressable by a `blob:` url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    id: u64,
    url: String,
}

impl BlobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// In-memory registry of blob urls, the way a browser tracks object urls.
///
/// Optionally capped; creating a handle beyond the cap fails.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: Mutex<HashMap<u64, Arc<[u8]>>>,
    next_id: AtomicU64,
    capacity: Option<usize>,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Plaintext behind a url, if it is still registered.
    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        let id = url.rsplit('/').next()?.parse::<u64>().ok()?;
        self.blobs.lock().get(&id).cloned()
    }

    pub fn live(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DisplayHandleFactory for BlobRegistry {
    type Handle = BlobHandle;

    fn create(&self, plaintext: &Arc<[u8]>) -> Result<BlobHandle, Error> {
        let mut blobs = self.blobs.lock();
        if let Some(cap) = self.capacity {
            if blobs.len() >= cap {
                return Err(Error::HandleCreation(format!(
                    "blob registry full ({cap} live handles)"
                )));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        blobs.insert(id, Arc::clone(plaintext));
        self.created.fetch_add(1, Ordering::SeqCst);
        trace!(id, len = plaintext.len(), "blob registered");
        Ok(BlobHandle {
            id,
            url: format!("blob:sealed-reader/{id}"),
        })
    }

    fn release(&self, handle: BlobHandle) {
        if self.blobs.lock().remove(&handle.id).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            trace!(id = handle.id, "blob revoked");
        }
    }
}

/// A page decoded to RGBA8 with its EXIF orientation applied.
#[derive(Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: RgbaImage,
}

impl DecodedImage {
    fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

/// Decodes plaintext into pixels on creation; the pixels are freed on release.
///
/// An optional budget caps the decoded bytes alive at once.
#[derive(Debug, Default)]
pub struct DecodedImageFactory {
    max_live_bytes: Option<usize>,
    live_bytes: AtomicUsize,
    live: AtomicUsize,
}

impl DecodedImageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(max_live_bytes: usize) -> Self {
        Self {
            max_live_bytes: Some(max_live_bytes),
            ..Self::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }
}

impl DisplayHandleFactory for DecodedImageFactory {
    type Handle = DecodedImage;

    fn create(&self, plaintext: &Arc<[u8]>) -> Result<DecodedImage, Error> {
        let pixels = decode_rgba8_apply_exif(plaintext)?;
        let (width, height) = pixels.dimensions();
        let decoded = DecodedImage {
            width,
            height,
            pixels,
        };
        let len = decoded.byte_len();
        let after = self.live_bytes.fetch_add(len, Ordering::SeqCst) + len;
        if let Some(max) = self.max_live_bytes {
            if after > max {
                self.live_bytes.fetch_sub(len, Ordering::SeqCst);
                return Err(Error::HandleCreation(format!(
                    "decoded {width}x{height} image exceeds budget of {max} bytes"
                )));
            }
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(decoded)
    }

    fn release(&self, handle: DecodedImage) {
        self.live_bytes.fetch_sub(handle.byte_len(), Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// Unknown orientations fall through unchanged.
fn decode_rgba8_apply_exif(bytes: &[u8]) -> Result<RgbaImage, Error> {
    let mut img = image::load_from_memory(bytes)
        .map_err(|e| Error::HandleCreation(format!("decode failed: {e}")))?
        .to_rgba8();

    let orientation = read_orientation(bytes).unwrap_or(1);
    match orientation {
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }
    Ok(img)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!(orientation = o, "exif orientation");
    Some(o)
}
