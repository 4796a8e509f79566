use core::error::Error;

use derive_more::Display;

#[derive(Debug, Display)]
pub enum DeliveryError {
    #[display("failed to build HTTP client")]
    ClientBuild,
    #[display("failed to compress payload")]
    Compress,
    #[display("request to ingestion endpoint failed")]
    Transport,
    #[display("request to ingestion endpoint timed out")]
    Timeout,
    #[display("ingestion endpoint responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[display("ingestion endpoint {url} is not reachable")]
    Connectivity { url: String },
}

impl Error for DeliveryError {}
