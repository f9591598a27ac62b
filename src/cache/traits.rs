//! Core types shared by the caching strategies.

use serde::Serialize;

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Served from a cache generation
  Cache,
  /// Network and exact cache match both failed; the offline document was served
  OfflineFallback,
  /// Made up by the agent (offline markers)
  Synthesized,
  /// Mutation accepted into the offline queue
  Queued,
}

