//! Transport contract the core consumes from (and exposes to) transports
//! (C7/§6). Concrete wire transports are out of scope per §1; this module
//! holds only the trait and the wire-level RPC shapes.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactDescriptor};
use crate::key::Key;

/// The four RPC methods the engine issues and answers (§4.7, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcMethod {
    Ping,
    Store { key: Key, value: Vec<u8> },
    FindNodes { key: Key },
    FindValue { key: Key },
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::Ping => "ping",
            RpcMethod::Store { .. } => "store",
            RpcMethod::FindNodes { .. } => "find_nodes",
            RpcMethod::FindValue { .. } => "find_value",
        }
    }
}

/// The three response shapes an RPC may return (§4.7, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcResponse {
    /// Literal `"pong"`, returned by `ping` and `store`.
    Pong,
    /// A list of `(contact-descriptor, distance)` pairs, returned by
    /// `find_nodes` and by `find_value` on a miss.
    Nodes(Vec<(ContactDescriptor, Key)>),
    /// `{value}`, returned by `find_value` on a hit.
    Value(Vec<u8>),
}

/// The interface the core consumes from transports (§6).
///
/// Methods are return-position-`impl Future` rather than `async fn` in a
/// trait requiring `async-trait`, matching the teacher's
/// `BootstrapTransport` trait.
pub trait Transport: Send + Sync {
    /// Send one RPC to `contact` and await its decoded result.
    ///
    /// `None` indicates transport failure; the core treats this as
    /// `Disconnected` (§7 `TransportFailure`).
    fn send_rpc(
        &self,
        contact: &Contact,
        method: RpcMethod,
    ) -> impl Future<Output = Option<RpcResponse>> + Send;

    /// Open a transport suitable for subsequent `send_rpc` calls. Called
    /// lazily by the core on first need.
    fn connect(&self, contact: &Contact) -> impl Future<Output = Option<()>> + Send;

    /// Tear down the transport for `contact`. Idempotent.
    fn disconnect(&self, contact: &Contact);
}
