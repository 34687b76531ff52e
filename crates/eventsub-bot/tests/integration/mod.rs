//! Integration tests for eventsub-bot.
//!
//! These tests verify the interaction between components:
//! - Session lifecycle against a live WebSocket server
//! - Session registration and notification forwarding
//! - Reconnect-request handling across servers

pub mod common;
