//! Longan - an OLE2 Compound File Binary (structured storage) container
//! engine.
//!
//! A compound file is a miniature FAT-style file system packed inside a
//! single host file: a tree of named *storages* (directories) holding
//! *streams* (files), each stream laid out as a linked chain of
//! fixed-size sectors. Two sector tiers coexist - big sectors of the
//! host file, and 64-byte mini sectors inside a mini stream that is
//! itself a big-sector stream - with streams placed by size. The format
//! is used by legacy Microsoft Office files (`.doc`, `.xls`, `.msg`)
//! among many others.
//!
//! This crate is the container engine only: the allocation tables, the
//! directory tree, stream I/O and the repack-on-close write path.
//! Interpreting stream contents (property sets, document formats) is
//! left to the layers above.
//!
//! # Example - create, reopen, read
//!
//! ```
//! use longan::Storage;
//!
//! let mut comp = Storage::in_memory()?;
//! comp.create_storage("/spam")?;
//! comp.create_stream("/spam/eggs", b"green")?;
//! let image = comp.close()?.into_inner();
//!
//! let mut comp = Storage::from_bytes(image)?;
//! assert_eq!(comp.read_stream("/spam/eggs")?, b"green");
//! # Ok::<(), longan::Error>(())
//! ```
//!
//! # Example - random-access stream I/O
//!
//! ```no_run
//! use longan::Storage;
//! use std::io::{Read, Seek, SeekFrom, Write};
//!
//! let mut comp = Storage::open_rw("report.doc")?;
//! let mut stream = comp.open_stream("/WordDocument")?;
//! stream.seek(SeekFrom::End(-4))?;
//! let mut tail = [0u8; 4];
//! stream.read_exact(&mut tail)?;
//! stream.write_all(b"....")?;
//! drop(stream);
//! comp.close()?;
//! # Ok::<(), longan::Error>(())
//! ```
//!
//! # Model
//!
//! Opening a container loads its structure into memory; mutation acts
//! on that in-memory state, and only explicit stream I/O touches the
//! host file before [`Storage::flush`] repacks everything into a fresh
//! compact image. A container opened read-only never writes; a
//! container that observed corruption mid-session refuses to repack,
//! leaving the host as it was.

/// Sector chain tables: walking, allocation and serialization
pub mod alloc;

/// On-disk format constants
pub mod consts;

/// Directory entries and the sibling-tree comparator
pub mod dirent;

/// Error and result types
pub mod error;

/// The 512-byte file header
pub mod header;

mod repack;

/// The container engine
pub mod storage;

/// Random-access stream handles
pub mod stream;

#[cfg(test)]
mod tests;

// Re-export the working set for convenient access
pub use alloc::AllocationTable;
pub use dirent::{cmp_names, Dirent, DirentKind};
pub use error::{Error, Result};
pub use header::Header;
pub use storage::{HostFile, OpenMode, Storage};
pub use stream::Stream;
