// File: phishsim-core/src/services/mod.rs

pub mod campaign_service;
pub mod dispatcher;
pub mod tracking_service;
pub mod training_assigner;
pub mod risk_engine;

pub use campaign_service::CampaignService;
pub use dispatcher::{CampaignDispatcher, DispatcherConfig};
pub use tracking_service::{TrackingPages, TrackingService};
pub use training_assigner::{spawn_training_assigner, TrainingAssignment};
pub use risk_engine::{spawn_risk_worker, RiskScoringEngine};
