//! Static crop definitions.

use serde::{Deserialize, Serialize};

/// The crops a plot can grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CropKind {
    Turnip,
    Potato,
    Carrot,
    Pumpkin,
}

/// Fixed per-crop parameters. Market demand moves the sale price at runtime;
/// everything here is constant.
#[derive(Debug, Clone, PartialEq)]
pub struct CropDef {
    pub seed_cost: u32,
    pub grow_minutes: f32,
    pub yield_min: u32,
    pub yield_max: u32,
    pub base_price: u32,
}

const TURNIP: CropDef = CropDef {
    seed_cost: 6,
    grow_minutes: 180.0,
    yield_min: 1,
    yield_max: 3,
    base_price: 9,
};

const POTATO: CropDef = CropDef {
    seed_cost: 10,
    grow_minutes: 300.0,
    yield_min: 1,
    yield_max: 4,
    base_price: 12,
};

const CARROT: CropDef = CropDef {
    seed_cost: 8,
    grow_minutes: 240.0,
    yield_min: 2,
    yield_max: 4,
    base_price: 7,
};

const PUMPKIN: CropDef = CropDef {
    seed_cost: 18,
    grow_minutes: 600.0,
    yield_min: 1,
    yield_max: 2,
    base_price: 34,
};

impl CropKind {
    pub const ALL: [CropKind; 4] = [
        CropKind::Turnip,
        CropKind::Potato,
        CropKind::Carrot,
        CropKind::Pumpkin,
    ];

    pub fn def(self) -> &'static CropDef {
        match self {
            CropKind::Turnip => &TURNIP,
            CropKind::Potato => &POTATO,
            CropKind::Carrot => &CARROT,
            CropKind::Pumpkin => &PUMPKIN,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CropKind::Turnip => "turnip",
            CropKind::Potato => "potato",
            CropKind::Carrot => "carrot",
            CropKind::Pumpkin => "pumpkin",
        }
    }

    pub fn parse(text: &str) -> Option<CropKind> {
        match text.trim().to_lowercase().as_str() {
            "turnip" | "turnips" => Some(CropKind::Turnip),
            "potato" | "potatoes" => Some(CropKind::Potato),
            "carrot" | "carrots" => Some(CropKind::Carrot),
            "pumpkin" | "pumpkins" => Some(CropKind::Pumpkin),
            _ => None,
        }
    }
}

impl std::fmt::Display for CropKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
