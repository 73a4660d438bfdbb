//! Tidemill Shared - Wire types exchanged between engine and clients.
//!
//! This crate contains everything both sides of the WebSocket agree on:
//! - Commands (`ClientCommand`)
//! - Push messages (`ServerMessage`)
//! - View DTOs (the world as one player sees it)
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - only serde and uuid
//! 2. **No business logic** - pure data types and serialization
//! 3. **No domain types** - raw `uuid::Uuid` ids and display strings only

pub mod commands;
pub mod messages;
pub mod views;

pub use commands::ClientCommand;
pub use messages::ServerMessage;
pub use views::{
    ArcView, CropCountView, CropPriceView, EconomyView, FactionView, FarmView, HappeningView,
    MissionView, MissionsView, NpcStanceView, NpcView, PlayerPublicView, PlayerView, PlotView,
    PointView, ReputationView, RoleRepView, TensionView, TownProgressView, TownView, WorldView,
};
