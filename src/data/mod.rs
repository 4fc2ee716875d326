//! Card records, bucket keys and the catalog universe.

pub mod key;
pub mod record;
pub mod universe;

pub use key::Key;
pub use record::{normalize, Record};
pub use universe::{Universe, UniverseEntry};
