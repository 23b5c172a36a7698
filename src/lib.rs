pub mod proto {
    pub mod chat {
        tonic::include_proto!("chat");
    }
}

pub mod archive;
pub mod catalog;
pub mod config;
pub mod database;
pub mod datafusion_engine;
pub mod domain;
pub mod engine;
pub mod error;
pub mod grpc_server;
pub mod history;
pub mod integrity;
pub mod llm_client;
pub mod loader;
pub mod models;
pub mod narrator;
pub mod schema;
pub mod session;
pub mod synthesizer;

pub use engine::ChatEngine;
pub use error::AnalysisError;
pub use grpc_server::GrpcServer;
pub use session::{ChatSession, SessionPipeline};
