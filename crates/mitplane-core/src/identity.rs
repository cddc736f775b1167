//! Layer 1: Identity atoms
//!
//! DeviceName: target device of a mitigation deployment
//! MitigationName: caller-chosen mitigation identifier
//! WorkflowId: per-device monotonic request slot

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidId;

macro_rules! nonempty_string_id {
    ($name:ident, $variant:ident, $max:expr) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
                let s = s.into();
                if s.trim().is_empty() {
                    return Err(InvalidId::$variant {
                        raw: s,
                        reason: "empty".into(),
                    });
                }
                if s.len() > $max {
                    return Err(InvalidId::$variant {
                        raw: s,
                        reason: format!("longer than {} bytes", $max),
                    });
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub(crate) fn from_static(s: &'static str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                $name::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

nonempty_string_id!(DeviceName, Device, 255);
nonempty_string_id!(MitigationName, Mitigation, 255);
nonempty_string_id!(ServiceName, Service, 255);
nonempty_string_id!(ResourceId, Resource, 255);

/// Owner identity of a resource-scoped mitigation. Must look like an ARN.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerArn(String);

impl OwnerArn {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(InvalidId::Owner {
                raw: s,
                reason: "empty".into(),
            });
        }
        if !s.starts_with("arn:") {
            return Err(InvalidId::Owner {
                raw: s,
                reason: "missing arn: prefix".into(),
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OwnerArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerArn({:?})", self.0)
    }
}

impl fmt::Display for OwnerArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for OwnerArn {
    type Error = InvalidId;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        OwnerArn::new(s)
    }
}

impl From<OwnerArn> for String {
    fn from(id: OwnerArn) -> String {
        id.0
    }
}

/// Identifier of a resource-scoped mitigation state record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MitigationId(Uuid);

impl MitigationId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, InvalidId> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| InvalidId::MitigationId {
                raw: s.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for MitigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MitigationId({})", self.0)
    }
}

impl fmt::Display for MitigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-device monotonic request slot. Allocated by scanning active requests;
/// never reused within a device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(i64);

impl WorkflowId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// The next slot after this one. Saturates rather than wrapping; the
    /// scope capacity check fires long before i64 overflow.
    pub fn next(&self) -> WorkflowId {
        WorkflowId(self.0.saturating_add(1))
    }
}

impl fmt::Debug for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowId({})", self.0)
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
