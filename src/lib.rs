//! Resolve Kerchunk reference catalogs into byte streams.
//!
//! A catalog maps Zarr keys to inline bytes, whole files or byte ranges of files named
//! by (possibly templated) URIs. [`store::ReferenceStore`] serves those keys on demand
//! and [`materialize::materialize`] writes every key into a local Zarr directory.

pub mod backends;
pub mod byte_range;
pub mod catalog;
pub mod config;
pub mod destination;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod materialize;
pub mod output;
pub mod resolver;
pub mod store;
pub mod template;
pub mod uri;
