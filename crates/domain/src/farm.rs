//! Per-player farming: plots, moisture, growth, and the sow/water/harvest
//! actions.
//!
//! Growth and randomness are injected (delta minutes, a draw closure) so the
//! whole engine is deterministic under test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Moment;
use crate::crops::CropKind;
use crate::geom::Vec2;

/// Fixed plot grid per farm: 4 columns by 3 rows.
pub const PLOTS_PER_FARM: usize = 12;
pub const PLOT_COLS: usize = 4;

/// World-unit spacing between neighbouring plots.
pub const PLOT_SPACING: f32 = 24.0;

/// Moisture lost per simulated minute.
pub const MOISTURE_DECAY_PER_MIN: f32 = 0.35;

/// Moisture gained per watering.
pub const WATER_BOOST: f32 = 45.0;

/// Moisture a freshly sown plot starts with.
pub const SOW_MOISTURE: f32 = 35.0;

/// Maximum distance between player and plot for farm actions.
pub const FARM_REACH: f32 = 96.0;

/// Coins a brand-new farm starts with.
pub const STARTING_COINS: u32 = 40;

// =============================================================================
// Plots
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlotState {
    #[default]
    Empty,
    Seeded,
    Growing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Plot {
    pub state: PlotState,
    pub crop: Option<CropKind>,
    /// Accumulated effective growth minutes, capped at the crop's total.
    pub growth: f32,
    /// 0 to 100. Dry plots still grow, just slowly.
    pub moisture: f32,
    pub last_watered: Option<Moment>,
}

// =============================================================================
// Farm
// =============================================================================

/// Seed and produce counts per crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Inventory {
    pub seeds: HashMap<CropKind, u32>,
    pub produce: HashMap<CropKind, u32>,
}

impl Inventory {
    /// Take one seed of `crop` if any is held.
    fn take_seed(&mut self, crop: CropKind) -> bool {
        match self.seeds.get_mut(&crop) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    fn add_produce(&mut self, crop: CropKind, count: u32) {
        *self.produce.entry(crop).or_insert(0) += count;
    }
}

/// One player's farm. Keyed by stable player id on the world, independent of
/// connection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farm {
    /// Anchor of the plot grid.
    pub home: Vec2,
    pub plots: Vec<Plot>,
    pub inventory: Inventory,
    pub coins: u32,
}

impl Farm {
    pub fn new(home: Vec2) -> Self {
        Self {
            home,
            plots: vec![Plot::default(); PLOTS_PER_FARM],
            inventory: Inventory::default(),
            coins: STARTING_COINS,
        }
    }

    /// World position of a plot, laid out on the grid from the home anchor.
    pub fn plot_position(&self, index: usize) -> Vec2 {
        let col = (index % PLOT_COLS) as f32;
        let row = (index / PLOT_COLS) as f32;
        Vec2::new(
            self.home.x + col * PLOT_SPACING,
            self.home.y + row * PLOT_SPACING,
        )
    }
}

// =============================================================================
// Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FarmAction {
    Sow(CropKind),
    Water,
    Harvest,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FarmActionError {
    #[error("No plot {index} on this farm")]
    InvalidPlot { index: usize },

    #[error("Plot must be {expected}")]
    WrongState { expected: &'static str },

    #[error("Seeds cost {need} coins, you have {have}")]
    InsufficientFunds { need: u32, have: u32 },
}

/// What a harvest produced, for inventory display and mission events.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestReport {
    pub crop: CropKind,
    pub count: u32,
    pub coins: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FarmOutcome {
    pub message: String,
    pub harvested: Option<HarvestReport>,
}

/// Advance moisture and growth on every occupied plot.
pub fn tick_growth(farm: &mut Farm, delta_minutes: f32) {
    for plot in &mut farm.plots {
        if !matches!(plot.state, PlotState::Seeded | PlotState::Growing) {
            continue;
        }
        let Some(crop) = plot.crop else { continue };

        plot.moisture = (plot.moisture - MOISTURE_DECAY_PER_MIN * delta_minutes).max(0.0);
        let rate = 0.3 + 0.7 * (plot.moisture / 100.0);
        plot.growth += delta_minutes * rate;

        let total = crop.def().grow_minutes;
        if plot.growth >= total {
            plot.growth = total;
            plot.state = PlotState::Ready;
        }
    }
}

/// Apply one player action to one plot.
///
/// `market_price` looks up the current per-crop sale price; `None` falls back
/// to the crop's static base price. `draw(n)` returns a uniform value in
/// `0..n` for harvest yields.
pub fn apply_action(
    farm: &mut Farm,
    plot_index: usize,
    action: FarmAction,
    now: Moment,
    market_price: &dyn Fn(CropKind) -> Option<u32>,
    draw: &mut dyn FnMut(u32) -> u32,
) -> Result<FarmOutcome, FarmActionError> {
    if plot_index >= farm.plots.len() {
        return Err(FarmActionError::InvalidPlot { index: plot_index });
    }

    match action {
        FarmAction::Sow(crop) => {
            if farm.plots[plot_index].state != PlotState::Empty {
                return Err(FarmActionError::WrongState { expected: "empty" });
            }
            // A held seed is used first; otherwise the seed is bought on the
            // spot from coins.
            if !farm.inventory.take_seed(crop) {
                let cost = crop.def().seed_cost;
                if farm.coins < cost {
                    return Err(FarmActionError::InsufficientFunds {
                        need: cost,
                        have: farm.coins,
                    });
                }
                farm.coins -= cost;
            }
            let plot = &mut farm.plots[plot_index];
            *plot = Plot {
                state: PlotState::Seeded,
                crop: Some(crop),
                growth: 0.0,
                moisture: SOW_MOISTURE,
                last_watered: None,
            };
            Ok(FarmOutcome {
                message: format!("Sowed a {crop} seed."),
                harvested: None,
            })
        }
        FarmAction::Water => {
            let plot = &mut farm.plots[plot_index];
            if !matches!(plot.state, PlotState::Seeded | PlotState::Growing) {
                return Err(FarmActionError::WrongState {
                    expected: "seeded or growing",
                });
            }
            plot.moisture = (plot.moisture + WATER_BOOST).min(100.0);
            plot.state = PlotState::Growing;
            plot.last_watered = Some(now);
            Ok(FarmOutcome {
                message: "Watered the plot.".to_string(),
                harvested: None,
            })
        }
        FarmAction::Harvest => {
            let plot = &mut farm.plots[plot_index];
            if plot.state != PlotState::Ready {
                return Err(FarmActionError::WrongState { expected: "ready" });
            }
            let Some(crop) = plot.crop else {
                return Err(FarmActionError::WrongState { expected: "ready" });
            };
            let def = crop.def();
            let span = def.yield_max - def.yield_min + 1;
            let count = def.yield_min + draw(span);
            let price = market_price(crop).unwrap_or(def.base_price);
            let coins = count * price;

            farm.inventory.add_produce(crop, count);
            farm.coins += coins;
            *plot = Plot::default();

            Ok(FarmOutcome {
                message: format!("Harvested {count} {crop}(s) for {coins} coins."),
                harvested: Some(HarvestReport { crop, count, coins }),
            })
        }
    }
}
