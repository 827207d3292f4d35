//! spore-prepare — turns an on-disk distribution into rollout inputs.
//!
//! A distribution is a directory tree:
//!
//! ```text
//! <dist_root>/
//!   base/
//!     base*.txt            checksum manifest, exactly one
//!     ...payload...
//!   conf/
//!     <configuration>/
//!       settings.txt       first line: `destination <install-path>`
//!       common/            optional shared overlay
//!         etc/post-install.sh   optional; enables the post phase
//!       <hostname>/        one per participating host
//! ```
//!
//! `prepare()` validates the layout, reads distribution metadata, and
//! produces the immutable `Distribution` plus configuration map the
//! rollout engine consumes. Archive unpacking is deliberately not handled
//! here — point `prepare()` at an already-unpacked tree.

pub mod discover;
pub mod error;

pub use discover::{prepare, Prepared};
pub use error::{PrepareError, PrepareResult};
