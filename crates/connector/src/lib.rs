//! Source adapters: fetch one external API and normalize its records into items.
//!
//! - [`SourceAdapter`]: `fetch(cursor) -> FetchPage` capability interface
//! - [`HttpSource`]: shared GET client with credential placement and error classification
//! - [`nasa`], [`space`], [`nist`]: bundled adapters
//! - [`AdapterRegistry`]: schedule entry → adapter binding

pub mod adapter;
pub mod http;
pub mod nasa;
pub mod nist;
pub mod registry;
pub mod space;

pub use adapter::{parse_timestamp, FetchPage, SourceAdapter};
pub use http::{Credential, CredentialPlacement, HttpSource};
pub use nasa::ApodAdapter;
pub use nist::{NvdAdapter, NvdCursor};
pub use registry::{build_adapter, AdapterRegistry, BUNDLED};
pub use space::CelestrakAdapter;
