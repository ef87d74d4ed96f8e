//! Write side of the container format.
//!
//! Emission is two explicit passes. Collect: populate the [`heaps`] builders
//! and the [`tables`] store, encode method bodies with
//! [`crate::assembly::MethodBodyBuilder`], attach them to their rows. Then
//! materialize: [`container::ContainerBuilder::build`] freezes every width
//! decision from the final content and serializes the image in one sweep.

pub mod container;
pub mod heaps;
pub mod tables;

pub use container::ContainerBuilder;
pub use heaps::{
    BlobHeapBuilder, GuidHeapBuilder, HeapManager, StringsHeapBuilder, UserStringHeapBuilder,
};
pub use tables::TableStore;
