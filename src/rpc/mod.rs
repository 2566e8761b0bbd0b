//! Hand-rolled JSON-RPC 2.0 dispatcher exposing the tool catalog over
//! stdio (§4.13).

mod dispatcher;
mod protocol;
mod tools;

pub use dispatcher::{run, DispatcherConfig};
pub use protocol::{RpcErrorBody, RpcRequest, RpcResponse, ToolDescriptor, PROTOCOL_VERSION};
pub use tools::{call, catalog, ServiceContext};
