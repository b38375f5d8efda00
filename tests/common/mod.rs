#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value as Json};
use worldmirror::{
    Address, FixtureLedger, InMemoryOpener, Mirror, MirrorBuilder, MirrorConfig, SigningIdentity,
    StaticInterfaceSource, StoreOpener, WorldConfig,
};

pub const WORLD: &str = r#"{
    "tables": {
        "OffchainMessagesTable": {
            "keySchema": {},
            "schema": {"from": "address", "timestamp": "uint256", "message": "string"},
            "offchainOnly": true
        },
        "CounterTable": {"keySchema": {}, "schema": "uint32"}
    },
    "systems": {
        "MessagingSystem": {"openAccess": true}
    }
}"#;

pub const MESSAGING: &str = r#"[
    {"type": "function", "name": "sendOffchainMessage", "stateMutability": "nonpayable",
     "inputs": [{"name": "message", "type": "string", "internalType": "string"}],
     "outputs": [{"name": "", "type": "tuple", "internalType": "struct OffchainMessagesTableData",
                  "components": [
                    {"name": "from", "type": "address", "internalType": "address"},
                    {"name": "timestamp", "type": "uint256", "internalType": "uint256"},
                    {"name": "message", "type": "string", "internalType": "string"}
                  ]}]},
    {"type": "function", "name": "increment", "stateMutability": "nonpayable",
     "inputs": [], "outputs": [{"name": "", "type": "uint32", "internalType": "uint32"}]},
    {"type": "function", "name": "_msgSender", "stateMutability": "view",
     "inputs": [], "outputs": [{"name": "", "type": "address"}]},
    {"type": "function", "name": "supportsInterface", "stateMutability": "pure",
     "inputs": [{"name": "interfaceId", "type": "bytes4"}],
     "outputs": [{"name": "", "type": "bool"}]}
]"#;

pub const TABLE: &str = "OffchainMessagesTable";

pub fn world_address() -> Address {
    Address::from_bytes([0x5f; 20])
}

pub fn sender() -> Address {
    Address::from_bytes([0xAB; 20])
}

pub fn identity() -> SigningIdentity {
    SigningIdentity::new(sender())
}

pub fn config() -> MirrorConfig {
    MirrorConfig::new(WorldConfig::from_json_str(WORLD).unwrap())
}

pub fn source() -> Arc<StaticInterfaceSource> {
    Arc::new(StaticInterfaceSource::new().with("MessagingSystem", MESSAGING))
}

/// Ledger answering `sendOffchainMessage` like the messaging system would.
pub fn messaging_ledger(timestamp: u64) -> Arc<FixtureLedger> {
    let ledger = Arc::new(FixtureLedger::new());
    ledger.respond_with("sendOffchainMessage", move |request| {
        let message = match request.args.first() {
            Some(worldmirror::AbiValue::String(s)) => s.clone(),
            _ => String::new(),
        };
        Ok(message_result(request.caller, timestamp, &message))
    });
    ledger
}

pub fn message_result(from: Address, timestamp: u64, message: &str) -> Json {
    json!({"from": from.to_hex(), "timestamp": timestamp.to_string(), "message": message})
}

pub async fn build(
    ledger: Arc<FixtureLedger>,
    opener: Arc<dyn StoreOpener>,
) -> worldmirror::MirrorResult<Mirror> {
    MirrorBuilder::new(config(), source(), ledger)
        .identity(identity())
        .opener(opener)
        .build(world_address())
        .await
}

pub async fn build_in_memory(ledger: Arc<FixtureLedger>) -> (Mirror, InMemoryOpener) {
    let opener = InMemoryOpener::new();
    let mirror = build(ledger, Arc::new(opener.clone())).await.unwrap();
    (mirror, opener)
}
