//! Port definitions (hexagonal architecture interfaces).
//!
//! This module defines the one boundary trait the domain core depends on:
//! [`cloud_provider::CloudProvider`]. Implementations live in the
//! `cloudhub-providers` adapter crate, one module per remote backend; the
//! wiring glue (HTTP engine, HTTP server, thread pool, per-provider
//! `InitData`) lives there too so this crate stays free of I/O dependencies.

pub mod cloud_provider;

pub use cloud_provider::{
    AuthCallback, AuthFlow, CloudProvider, DownloadSink, ThumbnailPolicy, UploadSource,
};
