//! Extraction of the client identifier and request cost from HTTP requests.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName};

use crate::config::{HttpConfig, MissingClientIdPolicy};
use crate::error::{PinglimitError, Result};
use crate::ratelimit::{validate_cost, ClientId, DEFAULT_COST};

/// Bucket shared by all header-less requests under the `anonymous` policy.
pub const ANONYMOUS_CLIENT_ID: &str = "anonymous";

/// How requests are mapped to a client identifier and cost.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    client_id_header: HeaderName,
    cost_header: HeaderName,
    missing_client_id: MissingClientIdPolicy,
}

impl RequestPolicy {
    /// Build the policy from configuration.
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client_id_header: parse_header_name(&config.client_id_header)?,
            cost_header: parse_header_name(&config.cost_header)?,
            missing_client_id: config.missing_client_id,
        })
    }

    /// Determine which client a request belongs to.
    ///
    /// A header that is present but empty or malformed is always an error; the
    /// missing-header policy only applies when the header is absent.
    pub fn client_id(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<ClientId> {
        match headers.get(&self.client_id_header) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    PinglimitError::InvalidClient(
                        "client identifier is not visible ASCII".to_string(),
                    )
                })?;
                ClientId::new(raw.trim())
            }
            None => match self.missing_client_id {
                MissingClientIdPolicy::Reject => Err(PinglimitError::MissingClientId),
                MissingClientIdPolicy::Anonymous => ClientId::new(ANONYMOUS_CLIENT_ID),
                MissingClientIdPolicy::RemoteAddr => {
                    let peer = peer.ok_or(PinglimitError::MissingClientId)?;
                    ClientId::new(peer.ip().to_string())
                }
            },
        }
    }

    /// Read the request cost, defaulting to one token.
    pub fn cost(&self, headers: &HeaderMap) -> Result<f64> {
        let Some(value) = headers.get(&self.cost_header) else {
            return Ok(DEFAULT_COST);
        };

        let raw = value
            .to_str()
            .map_err(|_| PinglimitError::InvalidCost("cost is not visible ASCII".to_string()))?;
        let cost: f64 = raw
            .trim()
            .parse()
            .map_err(|_| PinglimitError::InvalidCost(format!("{:?} is not a number", raw)))?;
        validate_cost(cost)?;
        Ok(cost)
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::try_from(name)
        .map_err(|e| PinglimitError::Config(format!("invalid header name {:?}: {}", name, e)))
}
