//! Core abstractions for store-agnostic migration.
//!
//! - [`schema`]: table and field descriptors
//! - [`value`]: row and value representation
//! - [`traits`]: the store and catalog capabilities the engine depends on
//!
//! Nothing here knows about a particular database engine; drivers under
//! `drivers/` implement the traits.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{FieldDescriptor, FieldKind, TableDescriptor, DEFAULT_PRIMARY_KEY};
pub use traits::{CatalogSource, RelationalStore};
pub use value::{Row, RowId, Value};
