//! # Pack Simulation Module
//!
//! Plant model for the 4S battery pack driven by the simulation loop.
//!
//! ## Components
//!
//! - **CellModel**: per-cell charge, terminal voltage and temperature integrator with
//!   the passive balancing flag
//! - **PackAggregator**: pack voltage (sum), pack temperature (max), signed pack
//!   current and coulomb-counted state of charge
//!
//! ## Usage
//!
//! ```rust
//! use bms_hil::config::PackConfig;
//! use bms_hil::simulation::{CellModel, PackAggregator};
//! use std::time::Duration;
//!
//! let config = PackConfig::default();
//! let aggregator = PackAggregator::new(config.capacity_ah);
//! let mut model = CellModel::new(config);
//! let mut cells = model.initial_cells();
//!
//! // Charge at 10 A for one 100 ms step
//! model.step(&mut cells, 10.0, 0.0, Duration::from_millis(100));
//!
//! let pack_voltage = PackAggregator::pack_voltage(&cells);
//! let soc = aggregator.advance_soc(50.0, 10.0, Duration::from_millis(100));
//! assert!(pack_voltage > 14.0 && soc > 50.0);
//! ```

pub mod cell_model;
pub mod pack;

pub use cell_model::{update_balancing, CellModel};
pub use pack::{PackAggregator, PackReadings};
