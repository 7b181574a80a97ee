//! File-mode frame mapping over an in-memory physical-memory image.

use std::ops::Deref;
use std::sync::Arc;

use guestmem_addresses::{Mfn, PageGeometry};

use crate::{FrameMapper, MapError, Protection};

/// Serves frame windows out of an owned copy of a memory image.
///
/// Frame numbers index the image directly: frame `n` covers bytes
/// `[n * page_size, (n + 1) * page_size)`. Single-frame windows borrow the
/// image; multi-frame windows over scattered frames are gathered into one
/// owned buffer so the contiguity contract of
/// [`map_pages`](FrameMapper::map_pages) holds.
///
/// Cloning is cheap; clones share the image.
#[derive(Clone)]
pub struct ImageMapper {
    image: Arc<[u8]>,
    geometry: PageGeometry,
}

impl ImageMapper {
    /// Wrap an image. Trailing partial frames are not addressable.
    #[must_use]
    pub fn new(image: impl Into<Arc<[u8]>>, geometry: PageGeometry) -> Self {
        Self {
            image: image.into(),
            geometry,
        }
    }

    /// Number of whole frames the image covers.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.image.len() / self.geometry.size() as usize
    }

    fn frame_range(&self, mfn: Mfn) -> Result<(usize, usize), MapError> {
        let size = self.geometry.size() as usize;
        let start = mfn.as_u32() as usize * size;
        let end = start + size;
        if end > self.image.len() {
            return Err(MapError::OutOfImage { mfn });
        }
        Ok((start, end))
    }
}

impl FrameMapper for ImageMapper {
    type Window = ImageWindow;

    fn map_page(&self, _prot: Protection, mfn: Mfn) -> Result<ImageWindow, MapError> {
        let (start, end) = self.frame_range(mfn)?;
        Ok(ImageWindow::Slice {
            image: Arc::clone(&self.image),
            start,
            end,
        })
    }

    fn map_pages(&self, prot: Protection, mfns: &[Mfn]) -> Result<ImageWindow, MapError> {
        // A run of adjacent frames can borrow the image like a single page.
        let adjacent = mfns
            .windows(2)
            .all(|pair| pair[1].as_u32() == pair[0].as_u32().wrapping_add(1));
        if let (true, Some(first)) = (adjacent, mfns.first()) {
            let (start, _) = self.frame_range(*first)?;
            let (_, end) = self.frame_range(mfns[mfns.len() - 1])?;
            return Ok(ImageWindow::Slice {
                image: Arc::clone(&self.image),
                start,
                end,
            });
        }

        let size = self.geometry.size() as usize;
        let mut gathered = Vec::with_capacity(mfns.len() * size);
        for mfn in mfns {
            let page = self.map_page(prot, *mfn)?;
            gathered.extend_from_slice(&page);
        }
        Ok(ImageWindow::Gathered(gathered.into_boxed_slice()))
    }
}

/// A window into an [`ImageMapper`] image.
#[derive(Debug)]
pub enum ImageWindow {
    /// Borrows a contiguous byte range of the shared image.
    Slice {
        image: Arc<[u8]>,
        start: usize,
        end: usize,
    },
    /// Owns bytes gathered from scattered frames.
    Gathered(Box<[u8]>),
}

impl Deref for ImageWindow {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Slice { image, start, end } => &image[*start..*end],
            Self::Gathered(bytes) => bytes,
        }
    }
}
