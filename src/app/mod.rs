pub mod client_pool;
pub mod ingest_use_case;
pub mod ports;

pub use client_pool::OutboundClientPool;
pub use ingest_use_case::{Delivery, IngestReport, IngestSettings, IngestUseCase};
