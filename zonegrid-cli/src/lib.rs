//! Command-line front end for zonegrid: configuration checks, roster
//! planning and failure simulation.

pub mod config;
pub mod planning;
