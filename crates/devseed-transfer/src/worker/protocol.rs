use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use devseed_core::EntityName;

use crate::errors::{Result, TransferError};

use super::frame::MAX_REQUEST_BYTES;

/// Ask the worker for the records of one configured strategy.
///
/// `destination` is the snapshot root the parent is writing, read by the
/// worker for membership checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub entity: EntityName,
    pub strategy: String,
    pub destination: PathBuf,
}

impl ExportRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_REQUEST_BYTES {
            return Err(TransferError::Frame(format!(
                "request for {} ({}) exceeds {MAX_REQUEST_BYTES} bytes",
                self.entity, self.strategy
            )));
        }
        Ok(payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|err| TransferError::Frame(format!("invalid export request: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_entity_labels() {
        let request = ExportRequest {
            entity: EntityName::new("auth", "users"),
            strategy: "internal".to_string(),
            destination: PathBuf::from("/tmp/snap"),
        };
        let payload = request.encode().expect("encode");
        let json: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(json["entity"], "auth.users");
        assert_eq!(ExportRequest::decode(&payload).expect("decode"), request);
        assert!(ExportRequest::decode(b"{\"entity\":\"users\"}").is_err());
    }
}
