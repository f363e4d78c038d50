use crate::core::{Block, Transaction};
use crate::network::Peer;
use serde::{Deserialize, Serialize};

/// Protocol version announced in height probes and block gossip
pub const NODE_VERSION: &str = "1.0.0";

/// Wire envelope: `{"type": "...", "message": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Package {
    Transaction(TransactionMessage),
    Block(BlockMessage),
    GetBlock { height: u64 },
    BlockData { block: Option<Block> },
    GetBestHeight { version: String },
    BestHeight(BestHeight),
    PeerExchange { requester: Peer },
    PeerList { peers: Vec<Peer> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub transaction: Transaction,
    pub sender: Peer,
    /// Peers known to the sender
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub block: Block,
    pub info: BlockInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub sender: Peer,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestHeight {
    pub height: u64,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let pkg = Package::GetBestHeight {
            version: NODE_VERSION.to_string(),
        };
        let value = serde_json::to_value(&pkg).unwrap();
        assert_eq!(
            value,
            json!({"type": "GET_BEST_HEIGHT", "message": {"version": "1.0.0"}})
        );
        let back: Package = serde_json::from_value(value).unwrap();
        assert_eq!(back, pkg);
    }

    #[test]
    fn test_type_tags() {
        let cases = vec![
            (Package::GetBlock { height: 3 }, "GET_BLOCK"),
            (Package::BlockData { block: None }, "BLOCK_DATA"),
            (
                Package::BestHeight(BestHeight {
                    height: 1,
                    version: NODE_VERSION.to_string(),
                }),
                "BEST_HEIGHT",
            ),
            (
                Package::PeerExchange {
                    requester: Peer::new("127.0.0.1", 2001),
                },
                "PEER_EXCHANGE",
            ),
            (Package::PeerList { peers: vec![] }, "PEER_LIST"),
            (
                Package::Block(BlockMessage {
                    block: Block::genesis(),
                    info: BlockInfo {
                        height: 1,
                        sender: Peer::new("127.0.0.1", 2001),
                        version: NODE_VERSION.to_string(),
                    },
                }),
                "BLOCK",
            ),
        ];
        for (pkg, tag) in cases {
            assert_eq!(serde_json::to_value(&pkg).unwrap()["type"], tag);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"type":"HELLO","message":{}}"#;
        assert!(serde_json::from_str::<Package>(raw).is_err());
    }
}
