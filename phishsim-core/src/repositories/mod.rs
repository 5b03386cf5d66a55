// src/repositories/mod.rs

pub mod postgres;

pub use postgres::template::PostgresTemplateRepository;
pub use postgres::campaign::PostgresCampaignRepository;
pub use postgres::result::PostgresResultRepository;
pub use postgres::risk_score::PostgresRiskScoreRepository;

pub use phishsim_common::traits::repository_traits::{
    CampaignRepository, ResultRepository, RiskScoreRepository, TemplateRepository,
};
