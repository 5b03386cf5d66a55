// src/repositories/postgres/mod.rs

pub mod template;
pub mod campaign;
pub mod result;
pub mod risk_score;
