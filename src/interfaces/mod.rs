pub mod mcp;
pub mod web;
