//! Client configuration.

use secsync_core::SigningKeyPair;
use std::collections::BTreeMap;
use tracing::level_filters::LevelFilter;

/// How chatty the client should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No log output.
    #[default]
    Off,
    /// Errors only.
    Error,
    /// Full debug output.
    Debug,
}

impl LoggingMode {
    /// The tracing filter this mode corresponds to. The library never
    /// installs a subscriber; hosts apply this to their own.
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Chain knowledge carried across reconnects.
///
/// When set, a freshly delivered document snapshot is verified against
/// this ancestor instead of being trusted on first sight.
#[derive(Debug, Clone)]
pub struct KnownSnapshotInfo {
    /// Id of the snapshot the client last confirmed.
    pub snapshot_id: String,
    /// Its base64url ciphertext (chain proof input).
    pub snapshot_ciphertext: String,
    /// Its parent chain proof.
    pub parent_snapshot_proof: String,
    /// Per-author update clocks applied on top of it.
    pub update_clocks: BTreeMap<String, u64>,
}

/// Everything a sync client needs, explicit at construction.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Document to synchronize.
    pub document_id: String,
    /// Websocket endpoint, e.g. `wss://sync.example.com`.
    pub websocket_host: String,
    /// Session key appended to the connection URL.
    pub websocket_session_key: String,
    /// Key pair signing every envelope this client authors.
    pub signature_key_pair: SigningKeyPair,
    /// Log verbosity.
    pub logging: LoggingMode,
    /// Optional chain knowledge from a previous session.
    pub known_snapshot_info: Option<KnownSnapshotInfo>,
}

impl SyncConfig {
    /// The connection URL for this document.
    pub fn connection_url(&self) -> String {
        format!(
            "{}/{}?sessionKey={}",
            self.websocket_host, self.document_id, self.websocket_session_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn connection_url_carries_doc_and_session_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let config = SyncConfig {
            document_id: "doc-1".into(),
            websocket_host: "wss://example.com".into(),
            websocket_session_key: "session-key".into(),
            signature_key_pair: SigningKeyPair::generate(&mut rng),
            logging: LoggingMode::Off,
            known_snapshot_info: None,
        };
        assert_eq!(
            config.connection_url(),
            "wss://example.com/doc-1?sessionKey=session-key"
        );
    }

    #[test]
    fn logging_modes_map_to_filters() {
        assert_eq!(LoggingMode::Off.level_filter(), LevelFilter::OFF);
        assert_eq!(LoggingMode::Error.level_filter(), LevelFilter::ERROR);
        assert_eq!(LoggingMode::Debug.level_filter(), LevelFilter::DEBUG);
    }
}
