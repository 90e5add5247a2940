//! Reexports of crates, that are part of the public api, for convenience

#[cfg(feature = "backend_drm")]
pub use drm;
#[cfg(feature = "backend_drm")]
pub use drm_ffi;
