//! ht-jsonrpc - Protocol Types
//!
//! JSON-RPC 2.0 envelopes exchanged by the HTTP transport.
//! This crate is the single source of truth for the wire shapes,
//! the protocol version string, and the error codes.

pub mod error;
pub mod jsonrpc;

pub use error::{RpcError, RpcErrorCode, VERSION_MISMATCH_MESSAGE};
pub use jsonrpc::{
    JSONRPC_VERSION, RequestId, RpcErrorResponse, RpcRequest, RpcResponse, RpcSuccessResponse,
};
