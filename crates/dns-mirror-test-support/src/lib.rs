//! Mock operator event stream server for integration tests, adapted from
//! the WebSocket mock server's accept-loop-per-connection shape but
//! speaking plain chunked HTTP with length-prefixed JSON frames instead.

pub mod mock_operator_server;

pub use mock_operator_server::MockOperatorServer;
