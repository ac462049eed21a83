//! Meridian Core - Routing keys, query values, and session state.
//!
//! This crate provides the data model shared by every layer of the Meridian
//! query router: the opaque routing keys that address rows and ranges, the
//! SQL-opaque query and result containers, the closed set of backend error
//! codes, and the session wire shape that carries multi-shard transaction
//! state across the RPC boundary.
//!
//! # Design
//!
//! - **Opaque keys**: `KeyspaceId` and `KeyRange` are byte strings; the
//!   router never interprets them beyond ordering and interval math
//! - **Closed error codes**: every backend failure maps into one code from
//!   a total severity order, so multi-shard failures collapse predictably
//! - **Session is the only mutable wire state**: everything else crossing
//!   the boundary is a value

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod query;
mod session;
mod types;

pub use error::TabletErrorCode;
pub use query::{BindValue, BindVariables, BoundQuery, Field, QueryResult, QueryResultList};
pub use session::{DuplicateShardSession, Session, ShardSession};
pub use types::{KeyRange, KeyspaceId, TabletAlias, TabletType};
