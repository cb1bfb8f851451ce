//! # thumbcache
//!
//! On-demand image thumbnails with cross-process cache coalescing. A request
//! names a source URL and a box size; the service downloads the source,
//! letterboxes it into the box as a JPEG, and stores the result under a
//! fingerprint of the source bytes and the box size.
//!
//! When many requests for the same thumbnail arrive at once, whether in
//! one process or across several sharing a store and a lock directory, one
//! of them computes and the rest wait for its result.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`service`] | Cache-coalescing core: fast path, lock, poll, unlocked fallback |
//! | [`imaging`] | Letterbox transformation, dimension math, JPEG/PNG/GIF codec |
//! | [`error`] | Error taxonomy: kinds, status codes, user-facing messages, JSON rendering |
//! | [`store`] | Artifact stores: in-memory and filesystem |
//! | [`locker`] | Leased locks: in-memory and lock-file |
//! | [`downloader`] | HTTP fetching with content sniffing and an allow-list |
//! | [`request`] | Validation of raw url/width/height parameters |
//! | [`config`] | `thumbcache.toml` loading, validation, and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Collaborators Behind Traits
//!
//! The service never names a concrete store, lock, or downloader. It holds
//! `Arc<dyn Store>`, `Arc<dyn Locker>`, and `Arc<dyn Downloader>`, and takes
//! the [`service::Transformation`] per call. Tests substitute scripted
//! collaborators; deployments choose between process-local and
//! filesystem-shared backends.
//!
//! ## Content-Addressed Artifacts
//!
//! The cache key is derived from the downloaded bytes, not the URL: two URLs
//! serving the same image share one artifact, and a changed image at the
//! same URL gets a new one. Nothing is invalidated or updated in place.
//!
//! ## Duplicate Work Over Unavailability
//!
//! Locks and stores are coordination aids, not correctness requirements. A
//! lock that cannot be acquired, a lease lost mid-computation, or a failed
//! store write all degrade to computing the same thumbnail more than once.
//! No request fails because coordination failed.
//!
//! ## Adaptive Polling
//!
//! A request that loses the lock race sleeps between store checks for half
//! the recent average computation time (see [`service::LatencyEstimate`]),
//! so it neither hammers the store nor oversleeps a fast peer.

pub mod config;
pub mod downloader;
pub mod error;
pub mod imaging;
pub mod locker;
pub mod output;
pub mod request;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
