/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.
All commands live in `mcp`: listing configured servers, the manual
initialization trigger, the pre-turn hook, and tool calls.
*/

pub mod mcp;
