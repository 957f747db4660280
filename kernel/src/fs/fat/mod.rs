//! FAT16 support: the sector-level driver and the VFS adapter.

pub mod adapter;
pub mod driver;

pub use adapter::FatFs;
pub use driver::Fat16Volume;
