//! Validated identifier value types for the agent core.
//!
//! Every id wraps a UUID and is constructed through a validating factory; the
//! nil UUID never passes. Ids are plain copyable data with no back-references.

use std::fmt;

use uuid::Uuid;

use crate::error::CoreError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Result<Self, CoreError> {
                if id.is_nil() {
                    return Err(CoreError::validation(concat!($label, " cannot be nil")));
                }
                Ok(Self(id))
            }

            pub fn from_string(id: &str) -> Result<Self, CoreError> {
                let parsed = Uuid::parse_str(id)
                    .map_err(|err| CoreError::validation(format!(concat!("invalid ", $label, ": {}"), err)))?;
                Self::new(parsed)
            }

            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// A user of the agent core. Gateway-side users carry provider-scoped
    /// ids instead; the mapping between the two happens at the A2A boundary.
    UserId,
    "user id"
);

uuid_id!(
    /// A registered MCP server endpoint.
    ServerId,
    "server id"
);

uuid_id!(
    /// A stored model configuration.
    ModelConfigId,
    "model config id"
);

/// An account binds a user to one authorization of one server. The composite
/// shape means any holder of an `AccountId` already knows where to connect
/// and on whose behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId {
    id: Uuid,
    user: UserId,
    server: ServerId,
}

impl AccountId {
    pub fn new(user: UserId, server: ServerId, id: Uuid) -> Result<Self, CoreError> {
        if id.is_nil() {
            return Err(CoreError::validation("account id cannot be nil"));
        }
        Ok(Self { id, user, server })
    }

    pub fn from_string(user: UserId, server: ServerId, id: &str) -> Result<Self, CoreError> {
        let parsed = Uuid::parse_str(id)
            .map_err(|err| CoreError::validation(format!("invalid account id: {err}")))?;
        Self::new(user, server, parsed)
    }

    pub fn random(user: UserId, server: ServerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            server,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn server(&self) -> ServerId {
        self.server
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
