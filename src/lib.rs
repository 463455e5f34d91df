//! Battery management system hardware-in-the-loop simulator.
//!
//! A 4S pack model feeds a fault monitor and a latching contactor, driven by
//! a fixed-cadence session loop that talks to its host through a tagged
//! message channel. A built-in harness exercises the safety state machine on
//! isolated engines.

pub mod api;
pub mod channel;
pub mod config;
pub mod controller;
pub mod domain;
pub mod harness;
pub mod session;
pub mod simulation;
pub mod telemetry;
