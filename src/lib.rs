//! Custodial relay between a ticket marketplace API and its smart contracts.
//!
//! Users authenticate against an external identity provider and receive a
//! custodial wallet from the [`wallet`] directory. Ticket and marketplace
//! operations in [`ticketing`] are turned into contract calls by the
//! [`contracts`] layer: the resolver picks the ABI overload that fits the
//! supplied arguments, the dispatcher signs and submits with a gas margin, and
//! the normalizer folds provider failures into a small error taxonomy. Reads go
//! straight to chain state through [`contracts::reader`].
//!
//! Binaries bootstrap from [`config::ServiceConfig`] and serve the HTTP
//! surface in [`api`].

pub mod api;
pub mod config;
pub mod contracts;
pub mod crypto;
pub mod errors;
pub mod identity;
pub mod ticketing;
pub mod types;
pub mod wallet;
