//! Inbound RPC dispatch (C7, §4.7).

use crate::contact::{Contact, ContactDescriptor};
use crate::error::DhtError;
use crate::helper::Helper;
use crate::key::Key;
use crate::routing_table::RoutingTable;
use crate::storage::Storage;
use crate::transport::{RpcMethod, RpcResponse};

/// What the caller must do after [`handle_rpc`] returns, beyond sending
/// back the response.
pub struct DispatchOutcome {
    pub response: RpcResponse,
    /// Every successful dispatch learns its sender (§4.7): the caller
    /// should enqueue `addToRoutingTable(sender)` asynchronously.
    pub learned_sender: Contact,
    /// Set when a `store` request actually changed local storage, so the
    /// caller can (re)arm that key's republish timer (§4.5).
    pub value_stored: Option<Key>,
}

/// Handle one inbound RPC. `claimed_sender_key` is whatever transport-level
/// identity accompanied the request; it must match `sender.key()` or the
/// request is rejected as a protocol violation (§4.7).
pub async fn handle_rpc(
    method: RpcMethod,
    sender: &Contact,
    claimed_sender_key: &Key,
    routing_table: &RoutingTable,
    storage: &Storage,
    k: usize,
) -> crate::error::Result<DispatchOutcome> {
    if sender.key() != claimed_sender_key {
        return Err(DhtError::SenderMismatch);
    }

    let mut value_stored = None;
    let response = match method {
        RpcMethod::Ping => RpcResponse::Pong,
        RpcMethod::Store { key, value } => {
            if storage.store_locally(key.clone(), value).await {
                value_stored = Some(key);
            }
            RpcResponse::Pong
        }
        RpcMethod::FindNodes { key } => {
            let helpers = routing_table.find_closest(&key, k).await?;
            RpcResponse::Nodes(to_wire(helpers))
        }
        RpcMethod::FindValue { key } => match storage.retrieve_locally(&key).await {
            Some(value) => RpcResponse::Value(value),
            None => {
                let helpers = routing_table.find_closest(&key, k).await?;
                RpcResponse::Nodes(to_wire(helpers))
            }
        },
    };

    Ok(DispatchOutcome {
        response,
        learned_sender: sender.clone(),
        value_stored,
    })
}

fn to_wire(helpers: Vec<Helper>) -> Vec<(ContactDescriptor, Key)> {
    helpers
        .into_iter()
        .map(|h| (ContactDescriptor::from(&h.contact), h.distance))
        .collect()
}
