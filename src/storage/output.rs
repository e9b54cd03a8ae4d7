//! Output file storage module
//!
//! Owns the memory-mapped output file. The mapping is handed out as
//! disjoint offset+length segments so that concurrent tasks can write their
//! own ranges without any locking on the data itself.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use memmap2::MmapMut;
use tracing::{debug, error, info, trace, warn};
use crate::error::AssembleError;
use crate::storage::zero::zero_region;

/// Memory-mapped output shared by all tasks of a run
pub struct OutputArena {
    // Field order is drop order: unmap before the file is closed
    map: MmapMut,
    file: File,
    path: PathBuf,
    ptr: *mut u8,
    len: usize,
    /// Claimed ranges, start -> length
    claims: Mutex<BTreeMap<usize, usize>>,
}

// Writes through `ptr` only happen via `Segment`s, whose ranges are checked
// to be disjoint when claimed.
unsafe impl Send for OutputArena {}
unsafe impl Sync for OutputArena {}

impl std::fmt::Debug for OutputArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputArena")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl OutputArena {
    fn new(file: File, path: PathBuf, toc_offset: u64, toc: &[u8]) -> Result<Self, AssembleError> {
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            error!("Failed to map '{}': {}", path.display(), e);
            AssembleError::storage_error_full("Failed to memory-map output", path.display().to_string(), e.to_string())
        })?;
        let len = map.len();

        let toc_start = to_usize(toc_offset, &path)?;
        let toc_end = toc_start.checked_add(toc.len()).filter(|&end| end <= len).ok_or_else(|| {
            AssembleError::storage_error_full(
                format!("table of contents [{}, +{}) does not fit in {} bytes", toc_start, toc.len(), len),
                path.display().to_string(),
                "layout",
            )
        })?;
        // The index region runs to the end of the file; stale bytes past the entries must go
        zero_region(&mut map[toc_start..]);
        map[toc_start..toc_end].copy_from_slice(toc);
        debug!(
            "Wrote {} byte table of contents at offset {}, zeroed through {}",
            toc.len(),
            toc_start,
            len
        );

        // The index region stays claimed for the lifetime of the arena
        let mut claims = BTreeMap::new();
        if len > toc_start {
            claims.insert(toc_start, len - toc_start);
        }

        let ptr = map.as_mut_ptr();
        Ok(Self {
            map,
            file,
            path,
            ptr,
            len,
            claims: Mutex::new(claims),
        })
    }

    /// Output file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim exclusive access to `[start, start + length)`
    ///
    /// Fails if the range is out of bounds or overlaps a range that is
    /// currently claimed by another segment.
    pub fn claim(self: &Arc<Self>, start: u64, length: u64) -> Result<Segment, AssembleError> {
        let start = to_usize(start, &self.path)?;
        let length = to_usize(length, &self.path)?;
        let end = start.checked_add(length).filter(|&end| end <= self.len).ok_or_else(|| {
            AssembleError::storage_error_full(
                format!("segment [{}, +{}) exceeds output of {} bytes", start, length, self.len),
                self.path.display().to_string(),
                "bounds",
            )
        })?;

        if length > 0 {
            let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
            let overlapping = claims
                .range(..end)
                .next_back()
                .map(|(&s, &l)| (s, l))
                .filter(|&(s, l)| s + l > start);
            debug_assert!(
                overlapping.is_none(),
                "segment [{}, {}) overlaps claimed range {:?}",
                start,
                end,
                overlapping
            );
            if let Some((s, l)) = overlapping {
                return Err(AssembleError::storage_error_full(
                    format!("segment [{}, {}) overlaps claimed range [{}, {})", start, end, s, s + l),
                    self.path.display().to_string(),
                    "overlap",
                ));
            }
            claims.insert(start, length);
        }

        trace!("Claimed segment [{}, {})", start, end);
        Ok(Segment {
            arena: Arc::clone(self),
            start,
            len: length,
        })
    }

    fn release(&self, start: usize, len: usize) {
        if len > 0 {
            let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
            claims.remove(&start);
        }
    }

    /// Flush written pages to stable storage
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

impl Drop for OutputArena {
    fn drop(&mut self) {
        if let Err(e) = self.map.flush() {
            warn!("flushing output buffer of '{}' failed: {}", self.path.display(), e);
        }
        if let Err(e) = self.file.sync_all() {
            warn!("syncing '{}' failed: {}", self.path.display(), e);
        }
        debug!("Released output mapping of '{}'", self.path.display());
    }
}

/// Exclusive view of one range of the output
pub struct Segment {
    arena: Arc<OutputArena>,
    start: usize,
    len: usize,
}

impl Segment {
    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the segment is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current contents
    pub fn as_slice(&self) -> &[u8] {
        // The claim guarantees no other segment aliases this range
        unsafe { std::slice::from_raw_parts(self.arena.ptr.add(self.start), self.len) }
    }

    /// Writable contents
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.arena.ptr.add(self.start), self.len) }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.arena.release(self.start, self.len);
    }
}

/// Prepared output file for a run
#[derive(Debug)]
pub struct OutputStore {
    arena: Arc<OutputArena>,
    resume_candidate: bool,
}

impl OutputStore {
    /// Open, size, allocate and map the output file, then write the table of contents
    ///
    /// An existing file of exactly `total_size` bytes is kept as a resume
    /// candidate. Any other existing file is only truncated when `overwrite`
    /// is set.
    pub fn prepare(
        path: &Path,
        total_size: u64,
        overwrite: bool,
        toc_offset: u64,
        toc: &[u8],
    ) -> Result<Self, AssembleError> {
        info!("Preparing output file: {} ({} bytes)", path.display(), total_size);
        let path_str = path.display().to_string();

        let existing_size = match std::fs::metadata(path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(AssembleError::storage_error_full("Failed to stat output", path_str, e.to_string()));
            }
        };

        let resume_candidate = existing_size == Some(total_size);
        if let Some(size) = existing_size {
            if !resume_candidate && !overwrite {
                return Err(AssembleError::config_error_with_field(
                    format!(
                        "output '{}' exists with size {} instead of the expected {}; use --overwrite to replace it",
                        path_str, size, total_size
                    ),
                    "output",
                ));
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                error!("Failed to open output '{}': {}", path_str, e);
                AssembleError::storage_error_full("Failed to open output", path_str.clone(), e.to_string())
            })?;

        if resume_candidate {
            info!("Existing output has the expected size, verifying it in place");
        } else {
            if existing_size.is_some() {
                warn!("Overwriting existing output '{}'", path_str);
            }
            file.set_len(0).map_err(|e| {
                AssembleError::storage_error_full("Failed to truncate output", path_str.clone(), e.to_string())
            })?;
        }

        allocate(&file, total_size).map_err(|e| {
            error!("Failed to allocate {} bytes for '{}': {}", total_size, path_str, e);
            AssembleError::storage_error_full("Failed to allocate output", path_str.clone(), e.to_string())
        })?;
        file.set_len(total_size).map_err(|e| {
            AssembleError::storage_error_full("Failed to size output", path_str.clone(), e.to_string())
        })?;

        let arena = OutputArena::new(file, path.to_path_buf(), toc_offset, toc)?;
        Ok(Self {
            arena: Arc::new(arena),
            resume_candidate,
        })
    }

    /// Whether a pre-existing file of the right size may already hold valid pieces
    pub fn resume_candidate(&self) -> bool {
        self.resume_candidate
    }

    /// Shared arena handing out segments
    pub fn arena(&self) -> &Arc<OutputArena> {
        &self.arena
    }

    /// Flush and release the mapping
    ///
    /// Failures are advisory: every piece has already been verified.
    pub fn close(self) {
        if let Err(e) = self.arena.flush() {
            warn!("flushing output buffer failed: {}", e);
        }
        if Arc::strong_count(&self.arena) > 1 {
            warn!("output mapping still referenced at close, release deferred to the last holder");
        }
    }
}

fn to_usize(value: u64, path: &Path) -> Result<usize, AssembleError> {
    usize::try_from(value).map_err(|_| {
        AssembleError::storage_error_full(
            format!("offset {} is not addressable on this platform", value),
            path.display().to_string(),
            "usize",
        )
    })
}

/// Reserve the full extent on disk so later writes cannot run out of space
#[cfg(target_os = "linux")]
fn allocate(file: &File, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if len == 0 {
        return Ok(());
    }
    let off_len = libc::off_t::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file size exceeds off_t"))?;
    let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, off_len) };
    match ret {
        0 => Ok(()),
        libc::EOPNOTSUPP | libc::EINVAL => {
            debug!("posix_fallocate unsupported here, falling back to set_len");
            file.set_len(len)
        }
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

#[cfg(not(target_os = "linux"))]
fn allocate(file: &File, len: u64) -> io::Result<()> {
    file.set_len(len)
}
