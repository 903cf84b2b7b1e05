//! Opaque, versioned state serialization.
//!
//! The entire runtime — call stack, instruction stack, value stack, status,
//! pending bundles, interaction log — round-trips through a single binary
//! document. Every suspension point is therefore a process boundary: a host
//! can dump a paused run, ship it elsewhere, and resume it without replaying
//! history.
//!
//! The envelope carries a schema version; loading an unknown version fails
//! loudly rather than guessing.

use serde::{Deserialize, Serialize};

use crate::state::RuntimeState;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u16,
    state: RuntimeState,
}

/// Why a snapshot could not be produced or restored.
#[derive(Debug)]
pub enum SnapshotError {
    Encode(postcard::Error),
    Decode(postcard::Error),
    UnsupportedVersion(u16),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(err) => write!(f, "snapshot encoding failed: {err}"),
            Self::Decode(err) => write!(f, "snapshot decoding failed: {err}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

impl RuntimeState {
    /// Serializes the state to the opaque binary snapshot format.
    pub fn dump(&self) -> Result<Vec<u8>, SnapshotError> {
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            state: self.clone(),
        };
        postcard::to_allocvec(&envelope).map_err(SnapshotError::Encode)
    }

    /// Restores a state from a snapshot produced by [`dump`](Self::dump).
    ///
    /// Reconstruction is direct — no history is replayed.
    pub fn load(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let envelope: Envelope = postcard::from_bytes(bytes).map_err(SnapshotError::Decode)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.state)
    }

    /// Clones the state through the snapshot boundary.
    ///
    /// Semantically defined as serialize-then-deserialize; the in-memory
    /// clone is the optimized equivalent since values are owned trees.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }
}
