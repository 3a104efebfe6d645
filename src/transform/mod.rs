//! Derived columns: dependency graph, layered registry, pipeline and manifest.
//!
//! Columns live in three layers. Source columns come from storage and have
//! no record; `derived` columns are persisted in the [`Manifest`] and
//! replayed on reload; `working` columns are session-local and shadow
//! derived and source columns of the same name.
//!
//! # Example
//!
//! ```ignore
//! use prism::storage::MemoryStore;
//! use prism::transform::{TransformPipeline, TransformSpec};
//!
//! let mut pipeline = TransformPipeline::new(store);
//! pipeline.execute_batch_transform("grades", vec![
//!     TransformSpec::new("doubled", "score * 2").derived(),
//!     TransformSpec::new("quadrupled", "doubled * 2").derived(),
//! ])?;
//! pipeline.manifest()?.save("transforms.json")?;
//! ```

pub mod dependency;
pub mod manifest;
pub mod pipeline;
pub mod registry;

pub use dependency::{
    build_dependency_map, extract_column_refs, find_dependents, has_circular_dependency,
    topological_sort, DependencyMap,
};
pub use manifest::{replay, Manifest, ManifestEntry, MANIFEST_VERSION};
pub use pipeline::{validate_column_name, TransformOutcome, TransformPipeline, TransformSpec};
pub use registry::{Layer, Registry, TableRegistry, TransformRecord};
