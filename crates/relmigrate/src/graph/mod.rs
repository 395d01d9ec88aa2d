//! Insertion ordering derived from catalog metadata.
//!
//! - [`dependency`]: table-level FK dependency graph
//! - [`table_order`]: topological table order with catalog-order cycle fallback
//! - [`row_order`]: parent-before-child ordering for self-referencing tables
//!
//! None of these fail. Unresolvable cycles degrade to a deterministic order
//! and are reported to the caller.

pub mod dependency;
pub mod row_order;
pub mod table_order;

pub use dependency::DependencyGraph;
pub use row_order::{sort_rows, RowOrder};
pub use table_order::{sort_tables, TableOrder};
