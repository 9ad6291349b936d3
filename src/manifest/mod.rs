//! Manifest acquisition, the in-memory manifest tree and YAML patching

pub mod kustomize;
pub mod patch;
pub mod source;
pub mod vfs;

pub use kustomize::{KustomizeBuilder, OverlayBuilder};
pub use patch::Patch;
pub use source::{HttpClient, HttpFetch, ImageFetch, LazyRuntime, SourceResolver};
pub use vfs::VirtualFs;
