//! Compass registry integration
//!
//! The Compass Director is the registry that links provisioned runtimes and
//! applications through named scenarios (formations). This crate provides:
//!
//! - [`client`] - The [`RegistryClient`] / [`ApplicationRegistry`] traits and
//!   the GraphQL-over-HTTP [`DirectorClient`]
//! - [`graphql`] - Request documents and response decoding
//! - [`auth`] - OAuth client-credentials token source
//! - [`registrar`] - Idempotent scenario registration

#![deny(missing_docs)]

pub mod auth;
pub mod client;
pub mod graphql;
pub mod registrar;

pub use client::{ApplicationRegistry, DirectorClient, DirectorConfig, RegistryClient};
pub use registrar::{
    ensure_present, ensure_scenario_registered, RegistrationReport, RegistrationStep, StepOutcome,
};
