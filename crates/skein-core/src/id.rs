//! Transfer and asset identifiers.
//!
//! Both ids are 128-bit opaque values. A transfer id names one logical
//! chunked flow between a source and a target and is scoped to one
//! (remote host, channel) pair; an asset id names a piece of content in
//! the object store. The nil id is reserved: requests for it short-circuit
//! without touching the wire.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Identifies one logical transfer between a source and a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub [u8; 16]);

/// Identifies a piece of content in the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub [u8; 16]);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub const NIL: $name = $name([0u8; 16]);

            /// Generate a fresh random id. Never returns the nil id.
            pub fn generate() -> Self {
                let mut bytes = [0u8; 16];
                loop {
                    rand::thread_rng().fill_bytes(&mut bytes);
                    if bytes != [0u8; 16] {
                        return Self(bytes);
                    }
                }
            }

            pub fn is_nil(&self) -> bool {
                self.0 == [0u8; 16]
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

impl_id!(TransferId);
impl_id!(AssetId);

/// Content class of a stored asset. The tag rides inside source and target
/// parameter payloads and names the store slot together with the asset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AssetKind {
    Texture = 0,
    Sound = 1,
    Animation = 2,
    Object = 3,
    Notecard = 4,
    Script = 5,
}

impl AssetKind {
    /// Short lowercase label, used as the store filename extension and in
    /// log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Texture => "texture",
            AssetKind::Sound => "sound",
            AssetKind::Animation => "animation",
            AssetKind::Object => "object",
            AssetKind::Notecard => "notecard",
            AssetKind::Script => "script",
        }
    }
}

impl TryFrom<u8> for AssetKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AssetKind::Texture),
            1 => Ok(AssetKind::Sound),
            2 => Ok(AssetKind::Animation),
            3 => Ok(AssetKind::Object),
            4 => Ok(AssetKind::Notecard),
            5 => Ok(AssetKind::Script),
            other => Err(WireError::UnknownAssetKind(other)),
        }
    }
}

impl From<AssetKind> for u8 {
    fn from(kind: AssetKind) -> u8 {
        kind as u8
    }
}
