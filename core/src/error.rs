//! Error kinds shared by the Chord and Pastry protocols (spec §7).

use thiserror::Error;

use crate::ids::NodeId;

/// Errors surfaced by the DHT core.
///
/// `StalePeer` is recovered from locally (finger-walk repair in Chord,
/// `__repair` in Pastry) and never crosses a `route`/`search` boundary —
/// it exists here so internal helpers have a typed way to signal it to
/// their immediate caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DhtError {
    #[error("node {0} already exists on the fabric")]
    DuplicateNodeId(NodeId),

    #[error("key is already stored at the target node")]
    DuplicateKey,

    #[error("key has no owner in the DHT")]
    NotInDht,

    #[error("peer {0} is no longer alive")]
    StalePeer(NodeId),

    #[error("no peer reachable within the bootstrap depth budget")]
    BootstrapUnreachable,
}
