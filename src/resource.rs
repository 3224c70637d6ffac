//! Static resource lookup: map a normalized request target to file bytes.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use thiserror::Error;

/// Read permission for "others"; files without it are refused.
const S_IROTH: u32 = 0o004;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such resource")]
    NotFound,
    #[error("resource not readable")]
    Forbidden,
    #[error("resource is a directory")]
    IsDirectory,
    #[error("mapping resource: {0}")]
    Io(#[from] io::Error),
}

/// Read-only private mapping of a whole file. Unmapped exactly once, on drop.
pub struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is PROT_READ and never aliased mutably.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map `len` bytes of `file`. `len` must be non-zero.
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty file",
            ));
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A resolved resource. Zero-length files carry no mapping.
pub struct Resource {
    pub size: u64,
    pub body: Option<MappedFile>,
}

pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, target: &str) -> Result<Resource, ResolveError>;
}

/// Serves files under a document root.
pub struct FsResolver {
    root: PathBuf,
}

impl FsResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, target: &str) -> Option<PathBuf> {
        let relative = target.trim_start_matches('/');
        if relative.split('/').any(|seg| seg == "..") {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl ResourceResolver for FsResolver {
    fn resolve(&self, target: &str) -> Result<Resource, ResolveError> {
        let path = self.path_for(target).ok_or(ResolveError::NotFound)?;
        let meta = fs::metadata(&path).map_err(|_| ResolveError::NotFound)?;

        // Checked in this order: unreadable beats directory.
        if meta.permissions().mode() & S_IROTH == 0 {
            return Err(ResolveError::Forbidden);
        }
        if meta.is_dir() {
            return Err(ResolveError::IsDirectory);
        }

        let size = meta.len();
        if size == 0 {
            return Ok(Resource { size, body: None });
        }
        let file = File::open(&path)?;
        let mapped = MappedFile::map(&file, size as usize)?;
        Ok(Resource {
            size,
            body: Some(mapped),
        })
    }
}
