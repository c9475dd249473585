//! JSON-RPC wire types shared by the HTTP surface, the stdio surface and the
//! child connection.

pub mod message;

pub use message::{
    parse_payload, Incoming, Payload, Request, RequestId, Response, RpcError, JSONRPC_VERSION,
};
