//! Data models for race tracking.
//!
//! - `RaceRecord`: a single race's configuration and status
//! - `RaceStatus`: practice session or scored race
//! - `Racer`: a participant entry on a record

pub mod race;

pub use race::{RaceRecord, RaceStatus, Racer};
