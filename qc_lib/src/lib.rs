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
//! Ingestion of MultiQC reports into the TrendyQC store.
//!
//! A report flows through:
//! 1. [`source`]: where the MultiQC data document and its platform metadata come from.
//! 2. [`normalize`]: assay and tool configuration applied to the raw sections,
//!    with sample labels resolved by [`sample_name`].
//! 3. [`instances`]: the per-sample storage records and their links.
//! 4. [`store`]: one atomic insert per report.
//!
//! [`runner::IngestionRunner`] drives a batch of reports through all of it.
//!

pub mod instances;
pub mod metadata;
pub mod normalize;
pub mod runner;
pub mod sample_name;
pub mod source;
pub mod store;

pub use instances::{build_instances, InstanceGraph};
pub use metadata::{ReportIds, ReportMetadata};
pub use normalize::{NormalizedReport, ReportNormalizer, ReportState};
pub use runner::{Digest, IngestionOutcome, IngestionRunner};
pub use source::{LocalReportDir, MetadataLookup, ReportSource};
pub use store::{JsonStore, MemoryStore, Storage, StorageError};
