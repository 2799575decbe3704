//! Endpoint list parsing for the full presence refresh.
//!
//! Shape of the backend's endpoint listing:
//! `{"status": "success", "endpoints": [{"Extension": "100", "Name": "...", "State": "NOT_INUSE"}]}`

use serde::Deserialize;

pub use pbxmon_core::types::EndpointSeed;

#[derive(Debug, Deserialize)]
struct EndpointListResponse {
    status: String,
    #[serde(default)]
    endpoints: Vec<EndpointSeed>,
}

/// Parse an endpoint listing. A non-success status yields an error carrying
/// the reported status.
pub fn parse_endpoint_list(body: &str) -> Result<Vec<EndpointSeed>, serde_json::Error> {
    let response: EndpointListResponse = serde_json::from_str(body)?;
    if response.status != "success" {
        return Err(serde::de::Error::custom(format!(
            "endpoint listing status: {}",
            response.status
        )));
    }
    Ok(response
        .endpoints
        .into_iter()
        .filter(|e| !e.extension.trim().is_empty())
        .collect())
}
