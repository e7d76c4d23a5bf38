//! # rootstock-id
//!
//! Typed identifiers for the entities an incident response touches.
//!
//! Every ID is a ULID behind a short prefix, `{prefix}_{ulid}`:
//!
//! - `dev_01HV4Z2WQXKJNM8GPQY6VBKC3D` for a sensor device
//! - `rdg_01HV4Z3MXNKPQR9HSTZ7WCLD4E` for a sensor reading
//! - `sci_01HV4Z4NYPLTRS0JTUA8XDME5F` for a scitizen (device owner)
//!
//! The prefix keeps a reading ID from being passed where a device ID is
//! expected, and the ULID keeps IDs sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
