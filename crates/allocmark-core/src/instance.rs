//! Independently loaded instances of a third-party allocator.
//!
//! Each [`AllocatorInstance`] owns a `dlopen` handle and an explicit dispatch
//! table ([`EntryPoints`]) resolved from that handle alone. Strategies call
//! through the table instead of linking the allocator statically, so three
//! instances really are three images with their own allocator state.
//! [`InstanceSet`] refuses a set in which two instances resolved the same
//! `malloc` address, i.e. the same image loaded twice.

use std::ffi::{CStr, CString, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::config::InstanceConfig;
use crate::error::LoadError;

/// Number of independently loaded instances.
pub const INSTANCE_COUNT: usize = 3;

pub type MallocFn = unsafe extern "C" fn(size: usize) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(count: usize, size: usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void);
pub type AlignedAllocFn = unsafe extern "C" fn(size: usize, alignment: usize) -> *mut c_void;
pub type AlignedFreeFn = unsafe extern "C" fn(ptr: *mut c_void, alignment: usize);

/// Dispatch table for one loaded allocator.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub malloc: MallocFn,
    pub calloc: CallocFn,
    pub free: FreeFn,
    pub malloc_aligned: AlignedAllocFn,
    pub free_aligned: AlignedFreeFn,
}

/// Exported symbol names of the five entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointNames {
    pub malloc: String,
    pub calloc: String,
    pub free: String,
    pub malloc_aligned: String,
    pub free_aligned: String,
}

impl EntryPointNames {
    /// `<prefix>malloc`, `<prefix>calloc`, `<prefix>free`,
    /// `<prefix>malloc_aligned`, `<prefix>free_aligned`.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            malloc: format!("{prefix}malloc"),
            calloc: format!("{prefix}calloc"),
            free: format!("{prefix}free"),
            malloc_aligned: format!("{prefix}malloc_aligned"),
            free_aligned: format!("{prefix}free_aligned"),
        }
    }
}

impl Default for EntryPointNames {
    fn default() -> Self {
        Self::with_prefix(crate::config::DEFAULT_SYMBOL_PREFIX)
    }
}

struct LibraryHandle(NonNull<c_void>);

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        // SAFETY: handle came from a successful `dlopen` and is closed once.
        unsafe { libc::dlclose(self.0.as_ptr()) };
    }
}

/// One loaded allocator instance.
pub struct AllocatorInstance {
    label: String,
    path: Option<PathBuf>,
    entry: EntryPoints,
    _library: Option<LibraryHandle>,
}

// SAFETY: the dispatch table holds plain function pointers into an image
// that stays mapped until the instance drops; the handle itself is only
// used by `dlclose` in `Drop`.
unsafe impl Send for AllocatorInstance {}
// SAFETY: shared access only reads the immutable dispatch table.
unsafe impl Sync for AllocatorInstance {}

impl std::fmt::Debug for AllocatorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorInstance")
            .field("label", &self.label)
            .field("path", &self.path)
            .field("identity", &format_args!("{:#x}", self.identity()))
            .finish()
    }
}

impl AllocatorInstance {
    /// `dlopen`s `path` privately (`RTLD_NOW | RTLD_LOCAL`) and resolves all
    /// five entry points from that handle.
    pub fn load(
        label: impl Into<String>,
        path: &Path,
        names: &EntryPointNames,
    ) -> Result<Self, LoadError> {
        let library = open(path)?;
        let malloc = resolve(&library, path, &names.malloc)?;
        let calloc = resolve(&library, path, &names.calloc)?;
        let free = resolve(&library, path, &names.free)?;
        let malloc_aligned = resolve(&library, path, &names.malloc_aligned)?;
        let free_aligned = resolve(&library, path, &names.free_aligned)?;

        // SAFETY: the symbols are the allocator's C entry points with the
        // signatures named by the `*Fn` aliases.
        let entry = unsafe {
            EntryPoints {
                malloc: std::mem::transmute::<*mut c_void, MallocFn>(malloc.as_ptr()),
                calloc: std::mem::transmute::<*mut c_void, CallocFn>(calloc.as_ptr()),
                free: std::mem::transmute::<*mut c_void, FreeFn>(free.as_ptr()),
                malloc_aligned: std::mem::transmute::<*mut c_void, AlignedAllocFn>(
                    malloc_aligned.as_ptr(),
                ),
                free_aligned: std::mem::transmute::<*mut c_void, AlignedFreeFn>(
                    free_aligned.as_ptr(),
                ),
            }
        };

        Ok(Self {
            label: label.into(),
            path: Some(path.to_path_buf()),
            entry,
            _library: Some(library),
        })
    }

    /// Wraps an already linked dispatch table.
    ///
    /// # Safety
    ///
    /// The five functions must form one allocator: pointers returned by
    /// `malloc`/`calloc` are released by `free`, pointers returned by
    /// `malloc_aligned` by `free_aligned`, and all of them stay callable for
    /// the life of the instance.
    #[must_use]
    pub unsafe fn from_entry_points(label: impl Into<String>, entry: EntryPoints) -> Self {
        Self {
            label: label.into(),
            path: None,
            entry,
            _library: None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry
    }

    /// Address of the resolved `malloc`; distinct images have distinct ones.
    #[must_use]
    pub fn identity(&self) -> usize {
        self.entry.malloc as usize
    }
}

fn open(path: &Path) -> Result<LibraryHandle, LoadError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| LoadError::InvalidPath(path.to_path_buf()))?;
    // SAFETY: `c_path` is a valid NUL-terminated string.
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
    NonNull::new(handle)
        .map(LibraryHandle)
        .ok_or_else(|| LoadError::Open {
            path: path.to_path_buf(),
            reason: last_dl_error(),
        })
}

fn resolve(
    library: &LibraryHandle,
    path: &Path,
    symbol: &str,
) -> Result<NonNull<c_void>, LoadError> {
    let missing = |reason: String| LoadError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: symbol.to_owned(),
        reason,
    };
    let c_symbol =
        CString::new(symbol).map_err(|_| missing("symbol name contains NUL".to_owned()))?;
    // SAFETY: clears any stale error state; `dlsym` is called on a live handle.
    let sym = unsafe {
        libc::dlerror();
        libc::dlsym(library.0.as_ptr(), c_symbol.as_ptr())
    };
    NonNull::new(sym).ok_or_else(|| missing(last_dl_error()))
}

fn last_dl_error() -> String {
    // SAFETY: `dlerror` returns null or a NUL-terminated thread-local string.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dynamic loader error".to_owned()
    } else {
        // SAFETY: non-null `dlerror` result is a valid C string.
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// The three process-wide allocator instances.
#[derive(Debug, Clone)]
pub struct InstanceSet {
    instances: [Arc<AllocatorInstance>; INSTANCE_COUNT],
}

impl InstanceSet {
    /// Loads every configured library. Any failure is fatal for the run.
    pub fn load(config: &InstanceConfig) -> Result<Self, LoadError> {
        let [first, second, third] = &config.libraries;
        let [first_label, second_label, third_label] = &config.labels;
        Self::from_instances([
            AllocatorInstance::load(first_label.clone(), first, &config.symbols)?,
            AllocatorInstance::load(second_label.clone(), second, &config.symbols)?,
            AllocatorInstance::load(third_label.clone(), third, &config.symbols)?,
        ])
    }

    /// Checks that the instances are pairwise distinct images.
    pub fn from_instances(
        instances: [AllocatorInstance; INSTANCE_COUNT],
    ) -> Result<Self, LoadError> {
        for (i, a) in instances.iter().enumerate() {
            for b in &instances[i + 1..] {
                if a.identity() == b.identity() {
                    return Err(LoadError::SharedInstance {
                        first: a.label.clone(),
                        second: b.label.clone(),
                    });
                }
            }
        }
        Ok(Self {
            instances: instances.map(Arc::new),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AllocatorInstance>> {
        self.instances.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<AllocatorInstance>> {
        self.instances.get(index)
    }
}

/// Copies `source` into `dir` three times under distinct names so that the
/// dynamic loader maps three separate images. A `source` that already is one
/// of the targets is refused rather than copied onto itself.
pub fn stage_copies(
    source: &Path,
    dir: &Path,
    stem: &str,
) -> Result<[PathBuf; INSTANCE_COUNT], LoadError> {
    std::fs::create_dir_all(dir)?;
    let targets: [PathBuf; INSTANCE_COUNT] =
        std::array::from_fn(|i| dir.join(crate::config::library_file_name(stem, i + 1)));
    let source_real = std::fs::canonicalize(source)?;
    if let Some(target) = targets
        .iter()
        .find(|t| std::fs::canonicalize(t).is_ok_and(|t| t == source_real))
    {
        return Err(LoadError::InvalidPath(target.clone()));
    }
    for target in &targets {
        std::fs::copy(source, target)?;
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_names_follow_mimalloc_convention() {
        let names = EntryPointNames::default();
        assert_eq!(names.malloc, "mi_malloc");
        assert_eq!(names.calloc, "mi_calloc");
        assert_eq!(names.free, "mi_free");
        assert_eq!(names.malloc_aligned, "mi_malloc_aligned");
        assert_eq!(names.free_aligned, "mi_free_aligned");
        assert_eq!(EntryPointNames::with_prefix("je_").free, "je_free");
    }

    #[test]
    fn missing_library_fails_to_open() {
        let err = AllocatorInstance::load(
            "missing",
            Path::new("/nonexistent/liballocmark-missing.so"),
            &EntryPointNames::default(),
        )
        .expect_err("nonexistent library must not load");
        assert!(matches!(err, LoadError::Open { .. }), "{err}");
    }

    #[test]
    fn interior_nul_path_is_rejected() {
        let path = PathBuf::from("lib\0bad.so");
        let err = AllocatorInstance::load("bad", &path, &EntryPointNames::default())
            .expect_err("NUL path");
        assert!(matches!(err, LoadError::InvalidPath(_)));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn library_without_aligned_entry_points_is_rejected() {
        // glibc exports malloc/calloc/free but no `malloc_aligned`.
        let err = AllocatorInstance::load(
            "glibc",
            Path::new("libc.so.6"),
            &EntryPointNames::with_prefix(""),
        )
        .expect_err("libc has no malloc_aligned");
        match err {
            LoadError::MissingSymbol { symbol, .. } => assert_eq!(symbol, "malloc_aligned"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn staging_produces_three_distinct_files() {
        let dir = std::env::temp_dir().join(format!("allocmark-stage-{}", std::process::id()));
        let source = dir.join("source.bin");
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(&source, b"image").expect("write source");

        let staged = stage_copies(&source, &dir.join("out"), "demo").expect("stage");
        for (i, path) in staged.iter().enumerate() {
            assert_eq!(std::fs::read(path).expect("read copy"), b"image");
            assert!(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(&format!("demo{}", i + 1)))
            );
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn staging_onto_the_source_is_refused() {
        let dir = std::env::temp_dir().join(format!("allocmark-restage-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let source = dir.join(crate::config::library_file_name("demo", 2));
        std::fs::write(&source, b"image").expect("write source");

        let err = stage_copies(&source, &dir, "demo").expect_err("source is a target");
        assert!(matches!(&err, LoadError::InvalidPath(p) if *p == source), "{err}");
        assert_eq!(std::fs::read(&source).expect("source intact"), b"image");
        assert!(!dir.join(crate::config::library_file_name("demo", 1)).exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
