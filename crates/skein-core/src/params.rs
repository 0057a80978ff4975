//! Transfer parameter payloads.
//!
//! Every TransferRequest carries a source parameter payload telling the
//! peer what content to serve; TransferInfo echoes target parameters back.
//! Payloads are serde structs carried as JSON blobs, bounded by
//! [`MAX_PARAMS_SIZE`](crate::wire::MAX_PARAMS_SIZE) in both directions.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::id::{AssetId, AssetKind};
use crate::wire::{WireError, MAX_PARAMS_SIZE};

fn to_blob<T: Serialize>(value: &T) -> Result<Bytes, WireError> {
    let encoded = serde_json::to_vec(value).map_err(|e| WireError::BadParams(e.to_string()))?;
    if encoded.len() > MAX_PARAMS_SIZE {
        return Err(WireError::ParamsTooLarge(encoded.len()));
    }
    Ok(Bytes::from(encoded))
}

fn from_blob<T: DeserializeOwned>(blob: &[u8]) -> Result<T, WireError> {
    if blob.len() > MAX_PARAMS_SIZE {
        return Err(WireError::ParamsTooLarge(blob.len()));
    }
    serde_json::from_slice(blob).map_err(|e| WireError::BadParams(e.to_string()))
}

macro_rules! impl_blob {
    ($name:ident) => {
        impl $name {
            pub fn to_blob(&self) -> Result<Bytes, WireError> {
                to_blob(self)
            }

            pub fn from_blob(blob: &[u8]) -> Result<Self, WireError> {
                from_blob(blob)
            }
        }
    };
}

// ── Source parameters ─────────────────────────────────────────────────────────

/// Parameters for a plain asset fetch: serve this object from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSourceParams {
    pub asset_id: AssetId,
    pub kind: AssetKind,
}

impl_blob!(AssetSourceParams);

/// Parameters for fetching the asset behind an inventory item. The serving
/// side checks that (agent, session) may read (owner, task, item) before
/// resolving the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvItemSourceParams {
    pub agent_id: AssetId,
    pub session_id: AssetId,
    pub owner_id: AssetId,
    pub task_id: AssetId,
    pub item_id: AssetId,
    pub asset_id: AssetId,
    pub kind: AssetKind,
}

impl_blob!(InvItemSourceParams);

/// Estate-wide content classes addressable without a concrete asset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EstateKind {
    None = 0,
    Covenant = 1,
}

/// Parameters for fetching an estate asset (e.g. the covenant notecard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstateSourceParams {
    pub agent_id: AssetId,
    pub session_id: AssetId,
    pub estate_kind: EstateKind,
}

impl_blob!(EstateSourceParams);

// ── Target parameters ─────────────────────────────────────────────────────────

/// Target parameters for a store-backed (VFile) target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VFileTargetParams {
    pub asset_id: AssetId,
    pub kind: AssetKind,
}

impl_blob!(VFileTargetParams);

/// Target parameters for a plain filesystem target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTargetParams {
    pub path: PathBuf,
}

impl_blob!(FileTargetParams);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_params_round_trip() {
        let params = AssetSourceParams {
            asset_id: AssetId::from_bytes([3; 16]),
            kind: AssetKind::Texture,
        };
        let blob = params.to_blob().unwrap();
        assert!(blob.len() <= MAX_PARAMS_SIZE);
        assert_eq!(AssetSourceParams::from_blob(&blob).unwrap(), params);
    }

    #[test]
    fn inv_item_params_round_trip() {
        let params = InvItemSourceParams {
            agent_id: AssetId::from_bytes([1; 16]),
            session_id: AssetId::from_bytes([2; 16]),
            owner_id: AssetId::from_bytes([3; 16]),
            task_id: AssetId::from_bytes([4; 16]),
            item_id: AssetId::from_bytes([5; 16]),
            asset_id: AssetId::from_bytes([6; 16]),
            kind: AssetKind::Notecard,
        };
        let blob = params.to_blob().unwrap();
        assert_eq!(InvItemSourceParams::from_blob(&blob).unwrap(), params);
    }

    #[test]
    fn estate_params_round_trip() {
        let params = EstateSourceParams {
            agent_id: AssetId::from_bytes([7; 16]),
            session_id: AssetId::from_bytes([8; 16]),
            estate_kind: EstateKind::Covenant,
        };
        let blob = params.to_blob().unwrap();
        assert_eq!(EstateSourceParams::from_blob(&blob).unwrap(), params);
    }

    #[test]
    fn garbage_blob_is_an_error_not_a_panic() {
        assert!(matches!(
            AssetSourceParams::from_blob(b"not json"),
            Err(WireError::BadParams(_))
        ));
    }

    #[test]
    fn oversized_blob_rejected() {
        let blob = vec![b'x'; MAX_PARAMS_SIZE + 1];
        assert!(matches!(
            AssetSourceParams::from_blob(&blob),
            Err(WireError::ParamsTooLarge(_))
        ));
    }
}
