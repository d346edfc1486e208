//! # tagalloc - boundary tag memory allocator
//!
//! A user-space allocator that hands out 16-byte aligned blocks carved out of
//! page-aligned regions requested from the operating system.
//!
//! ```text
//!   MemAlloc
//!   ├── FreeList   unordered, doubly linked, stored inside free blocks
//!   ├── Growth     decides how big the next region is
//!   └── regions    chain of mapped regions
//!
//!   Region:
//!   +------+----------+----------+-------+-------+-------+----------+
//!   | next | prologue | block    | block | ...   | block | epilogue |
//!   +------+----------+----------+-------+-------+-------+----------+
//! ```
//!
//! Every block carries a boundary tag (size + allocated flag) at both of its
//! ends, so the neighbours of a block can be found in constant time when it is
//! released, and free neighbours are merged right away.
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::MemAlloc;
//!
//! let mut allocator = MemAlloc::new();
//! allocator.init();
//!
//! let ptr = allocator.allocate(100).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 16, 0);
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(0, 100);
//!     allocator.release(ptr);
//! }
//!
//! // The released block is reused.
//! assert_eq!(allocator.allocate(100).unwrap(), ptr);
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization, `MemAlloc` is not `Sync`.
//! - **No misuse detection**: releasing a foreign pointer or releasing twice
//!   is undefined behaviour.
//! - **Fixed alignment**: payloads are aligned to 16 bytes, nothing more.

mod block;
mod check;
mod config;
mod error;
mod freelist;
mod kernel;
mod memalloc;
mod region;
pub mod utils;

pub use check::HeapReport;
pub use config::Config;
pub use error::{AllocError, HeapError};
pub use kernel::{Kernel, PageProvider};
pub use memalloc::MemAlloc;
