//! Kernel error types.
//!
//! One `KernelError` enum with per-subsystem sub-enums. Callers match on
//! kinds, never on magic integers; the syscall table converts these to the
//! negative integers of the user ABI at the boundary.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Memory-related errors
    OutOfMemory {
        requested: usize,
    },
    InvalidAddress {
        addr: usize,
    },

    /// Filesystem-related errors
    Fs(FsError),

    /// Scheduler / process errors
    Sched(SchedError),

    /// User program loader errors
    Loader(LoaderError),

    /// Window manager errors
    Wm(WmError),

    /// Subsystem not initialized (called before init())
    NotInitialized {
        subsystem: &'static str,
    },
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
}

/// VFS error kinds shared by all filesystems.
///
/// The set is closed: every filesystem maps its internal failures onto one
/// of these before the error crosses the VFS boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Invalid argument (bad descriptor, bad path, bad whence)
    Inval,
    /// No such file or directory
    NoEnt,
    /// Underlying device or driver failure
    Io,
    /// Operation not supported by this filesystem
    NoSys,
    /// Target is a directory
    IsDir,
    /// Target is not a directory
    NotDir,
    /// No space left on the filesystem
    NoSpc,
    /// Descriptor table exhausted
    MFile,
}

/// Scheduler / process errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Process table full
    NoSlot,
    /// PID does not name a live process
    InvalidPid { pid: u32 },
    /// Kill of PID 0 or the idle thread refused
    KillRefused { pid: u32 },
}

/// User program loader errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    /// Malformed ELF image
    BadElf,
    /// Not a little-endian i386 executable
    UnsupportedArch,
    /// Image does not fit the load window, or no memory for it
    PlacementFailed,
}

/// Window manager errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmError {
    TooManyWindows,
    InvalidWindowId { id: u32 },
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsError::Inval => "invalid argument",
            FsError::NoEnt => "no such file or directory",
            FsError::Io => "I/O error",
            FsError::NoSys => "operation not supported",
            FsError::IsDir => "is a directory",
            FsError::NotDir => "not a directory",
            FsError::NoSpc => "no space left on device",
            FsError::MFile => "too many open files",
        };
        f.write_str(name)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested } => {
                write!(f, "out of memory ({} bytes requested)", requested)
            }
            KernelError::InvalidAddress { addr } => write!(f, "invalid address {:#x}", addr),
            KernelError::Fs(e) => write!(f, "{}", e),
            KernelError::Sched(e) => write!(f, "{:?}", e),
            KernelError::Loader(e) => write!(f, "{:?}", e),
            KernelError::Wm(e) => write!(f, "{:?}", e),
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{} not initialized", subsystem)
            }
            KernelError::InvalidArgument { name, value } => {
                write!(f, "invalid argument {}: {}", name, value)
            }
        }
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        KernelError::Fs(e)
    }
}

impl From<SchedError> for KernelError {
    fn from(e: SchedError) -> Self {
        KernelError::Sched(e)
    }
}

impl From<LoaderError> for KernelError {
    fn from(e: LoaderError) -> Self {
        KernelError::Loader(e)
    }
}

impl From<WmError> for KernelError {
    fn from(e: WmError) -> Self {
        KernelError::Wm(e)
    }
}

/// Result type alias using KernelError
pub type KernelResult<T> = Result<T, KernelError>;

/// Result type alias for filesystem operations
pub type FsResult<T> = Result<T, FsError>;
