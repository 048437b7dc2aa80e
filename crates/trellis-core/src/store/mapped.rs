//! Memory-mapped store file, the windowed byte-range provider under every
//! record store.

use crate::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Memory-mapped file wrapper
pub(crate) struct MappedFile {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    current_size: usize,
}

impl MappedFile {
    /// Create or open a memory-mapped file
    pub(crate) fn new<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let current_size = file.metadata()?.len() as usize;
        let current_size = if current_size == 0 {
            file.set_len(initial_size as u64)?;
            initial_size
        } else {
            current_size
        };

        // SAFETY: the file is opened read/write by this process only and every
        // access goes through bounds-checked slices below.
        let mmap = unsafe { MmapOptions::new().len(current_size).map_mut(&file)? };

        Ok(Self {
            file,
            mmap,
            path,
            current_size,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.current_size
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Grow the file (doubling) until `required` bytes are addressable
    pub(crate) fn ensure_capacity(&mut self, required: usize) -> Result<()> {
        if required <= self.current_size {
            return Ok(());
        }
        let mut new_size = self.current_size.max(1);
        while new_size < required {
            new_size *= 2;
        }
        self.resize(new_size)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.mmap.flush()?;
        self.file.set_len(new_size as u64)?;
        // SAFETY: see `new`; the old mapping is dropped when replaced.
        self.mmap = unsafe { MmapOptions::new().len(new_size).map_mut(&self.file)? };
        tracing::debug!(
            "Grew {:?} from {} to {} bytes",
            self.path,
            self.current_size,
            new_size
        );
        self.current_size = new_size;
        Ok(())
    }

    /// Get slice at offset
    pub(crate) fn get_slice(&self, offset: usize, size: usize) -> Result<&[u8]> {
        if offset + size > self.current_size {
            return Err(Error::storage(format!(
                "Read beyond file size: offset={}, size={}, file_size={}",
                offset, size, self.current_size
            )));
        }
        Ok(&self.mmap[offset..offset + size])
    }

    /// Get mutable slice at offset
    pub(crate) fn get_slice_mut(&mut self, offset: usize, size: usize) -> Result<&mut [u8]> {
        if offset + size > self.current_size {
            return Err(Error::storage(format!(
                "Write beyond file size: offset={}, size={}, file_size={}",
                offset, size, self.current_size
            )));
        }
        Ok(&mut self.mmap[offset..offset + size])
    }

    /// Flush to disk
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
