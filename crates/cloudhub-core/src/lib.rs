//! cloudhub-core - Domain logic and the provider port
//!
//! This crate contains the hexagonal architecture core of cloudhub:
//! - **Domain entities** - [`domain::Item`], [`domain::Token`], [`domain::Range`],
//!   [`domain::Hints`], [`domain::ListPage`]/[`domain::GeneralData`], and the
//!   [`domain::CoreError`] taxonomy.
//! - **Port definitions** - [`ports::CloudProvider`], the single trait every
//!   remote-backend adapter implements.
//! - **Configuration** - [`config::Config`], the typed YAML configuration
//!   surface shared by the CLI and any embedding application.
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) pattern. The domain
//! module contains pure business logic with no I/O dependencies; the ports
//! module defines the trait interface that the `cloudhub-providers` adapter
//! crate implements. Wiring glue (HTTP engine, OAuth loopback server, thread
//! pool) lives in the dependent crates, not here, so this crate never needs
//! to pull in an HTTP client or an async runtime beyond `async-trait`.

pub mod config;
pub mod domain;
pub mod ports;
