pub mod docker;
pub mod models;
pub mod service_interaction;

pub use models::{
    AccelerometerData, AgentData, GpsData, NewRecord, ProcessedAgentData, ProcessedAgentDataInDB,
};

// Path segment under which the store exposes the processed agent data collection.
pub const PROCESSED_AGENT_DATA_PATH: &str = "processed_agent_data";
