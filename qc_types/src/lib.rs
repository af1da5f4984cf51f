// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
// Other warnings (as of rust 1.55)
#![deny(
    bindings_with_variant_name,
    confusable_idents,
    const_item_mutation,
    deprecated,
    drop_bounds,
    elided_lifetimes_in_paths,
    exported_private_dependencies,
    irrefutable_let_patterns,
    non_shorthand_field_patterns,
    overlapping_range_endpoints,
    renamed_and_removed_lints,
    stable_features,
    trivial_bounds,
    type_alias_bounds,
    unconditional_recursion,
    unknown_lints,
    unused_comparisons,
    while_true
)]

//!
//! Shared vocabulary of the TrendyQC ingestion pipeline.
//!
//! * [`value`] coerces raw MultiQC scalars into typed [`QcValue`]s.
//! * [`table`] is the static registry of storage tables and the tool that
//!   feeds each of them.
//! * [`record`] holds the flat, not yet persisted [`StorageRecord`]s.
//! * [`message`] carries the per-report info/warning/error log.
//!

pub mod message;
pub mod record;
pub mod table;
pub mod value;

pub use message::{Message, Messages, Severity};
pub use record::{FieldValue, RecordKey, StorageRecord};
pub use table::{HappyType, LinkTable, Table, TableDescriptor, ToolKey};
pub use value::{coerce, QcValue};
