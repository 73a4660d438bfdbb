//! Tidemill Engine library.
//!
//! This crate contains all server-side code for the Tidemill town engine.
//!
//! ## Structure
//!
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - HTTP and WebSocket entry points
//! - `app` - Application composition
//! - `tick` - The simulation heartbeat
//! - `refresh` - The daily rollover pipeline
//! - `commands`, `dialogue`, `npc_chat`, `npc_tasks` - Player and NPC behavior
//! - `persistence`, `view`, `fallback` - Snapshots, client views, offline lines

pub mod api;
pub mod app;
pub mod commands;
pub mod dialogue;
pub mod fallback;
pub mod infrastructure;
pub mod npc_chat;
pub mod npc_tasks;
pub mod persistence;
pub mod refresh;
pub mod tick;
pub mod view;

pub use app::App;
