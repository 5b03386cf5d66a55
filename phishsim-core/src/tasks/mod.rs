// File: phishsim-core/src/tasks/mod.rs

pub mod campaign_sweep;
pub mod risk_sweep;
