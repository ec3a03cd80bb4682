//! Reference galleries, the images a capture is compared against.

use crate::preprocess::{self, PreprocessError};
use crate::types::FaceTensor;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to list gallery {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where a reference image's pixels come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded image on disk, read on every use.
    File(PathBuf),
    /// Encoded image bytes (JPEG, PNG, ...).
    Encoded(Vec<u8>),
    /// Already decoded RGB pixels.
    Image(RgbImage),
}

impl ImageSource {
    pub fn to_tensor(&self) -> Result<FaceTensor, PreprocessError> {
        match self {
            ImageSource::File(path) => preprocess::preprocess_file(path),
            ImageSource::Encoded(bytes) => preprocess::preprocess_encoded(bytes),
            ImageSource::Image(img) => preprocess::preprocess_image(img),
        }
    }
}

/// A named reference image.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub name: String,
    pub source: ImageSource,
}

impl GalleryEntry {
    pub fn new(name: impl Into<String>, source: ImageSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Supplies the reference gallery at verification time.
///
/// Called once per verification; implementations must return every
/// reference exactly once.
pub trait GallerySource {
    fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError>;
}

/// Gallery backed by a directory of image files.
///
/// The directory is listed on every call, so files added or removed between
/// verifications are picked up. Entries are sorted by file name.
/// Subdirectories and files whose extension is not a readable image format
/// are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryGallery {
    dir: PathBuf,
}

impl DirectoryGallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_supported_image(path: &Path) -> bool {
    ImageFormat::from_path(path).is_ok_and(|f| f.reading_enabled())
}

impl GallerySource for DirectoryGallery {
    fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut entries = Vec::new();
        for item in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let item = item.map_err(io_err)?;
            let path = item.path();
            if !path.is_file() {
                continue;
            }
            if !is_supported_image(&path) {
                tracing::debug!(path = %path.display(), "skipping non-image gallery file");
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            entries.push(GalleryEntry::new(name, ImageSource::File(path)));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Gallery held in memory; used for fixtures and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct MemoryGallery {
    entries: Vec<GalleryEntry>,
}

impl MemoryGallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: GalleryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GallerySource for MemoryGallery {
    fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        Ok(self.entries.clone())
    }
}
