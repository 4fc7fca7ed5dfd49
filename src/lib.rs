// ABOUTME: Library crate for mcp-gateway exposing the pool, Docker and MCP client APIs

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod docker;
pub mod mcp;
pub mod mcp_pool;
