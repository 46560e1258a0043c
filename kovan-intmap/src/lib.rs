//! Lock-free integer hash map with cooperative resizing, using kovan memory
//! reclamation.
//!
//! Keys and values are positive `i64`s. The table is open-addressed and
//! probed linearly; when a probe sequence overflows, a table of twice the
//! size is installed and every thread that touches the old one helps copy it
//! forward, slot by slot, with single-word CAS.
//!
//! # Features
//!
//! - **Lock-Free**: No mutexes, spinlocks, or blocking waits
//! - **Cooperative Growth**: Migration is finished by whichever threads run
//!   into it, so a stalled resizer never stalls the map
//! - **Safe Memory Reclamation**: Retired tables are freed through kovan once
//!   no thread can still observe them
//!
//! # Example
//!
//! ```rust
//! use kovan_intmap::IntMap;
//!
//! let map = IntMap::new();
//!
//! map.put(42, 7).unwrap();
//! assert_eq!(map.get(42).unwrap(), 7);
//!
//! // Absent keys read as zero
//! assert_eq!(map.remove(42).unwrap(), 7);
//! assert_eq!(map.get(42).unwrap(), 0);
//!
//! // Keys must be positive
//! assert!(map.get(0).is_err());
//! ```

#![warn(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod error;
mod generation;
mod map;
mod value;

pub use error::{Error, Result};
pub use map::{DEFAULT_CAPACITY, IntMap};
pub use value::{MAX_VALUE, TOMBSTONE, is_value};
