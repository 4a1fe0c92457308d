//! Inbound RPC commands and their responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Command configuration property carrying the caller's security token.
pub const SECURITY_TOKEN_PROPERTY: &str = "fleetcomm.security-token";

/// Command type of remote method invocations.
pub const REMOTE_POJO_COMMAND_TYPE: &str = "remotepojo";

/// An RPC received from a remote client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundCommand {
    /// Declared command type, e.g. `remotepojo`.
    pub command_type: String,
    /// Target interface for remote method invocations.
    #[serde(default)]
    pub target_interface: Option<String>,
    /// Method name for remote method invocations.
    #[serde(default)]
    pub method: Option<String>,
    /// Command configuration declared by the sender.
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Opaque payload for the business handler.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl InboundCommand {
    /// Create a remote method invocation command.
    pub fn remote_call(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            command_type: REMOTE_POJO_COMMAND_TYPE.to_string(),
            target_interface: Some(interface.into()),
            method: Some(method.into()),
            ..Default::default()
        }
    }

    /// Builder-style helper to attach a security token.
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.config
            .insert(SECURITY_TOKEN_PROPERTY.to_string(), token.into());
        self
    }

    /// The security token declared in the command configuration, if any.
    pub fn security_token(&self) -> Option<&str> {
        self.config
            .get(SECURITY_TOKEN_PROPERTY)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// Outcome of dispatching an inbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResponse {
    /// The handler completed successfully.
    Success { result: serde_json::Value },
    /// The handler failed.
    Failure { message: String },
    /// The command was refused before reaching a handler.
    Rejected { reason: String },
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandResponse::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_token_extraction() {
        let cmd = InboundCommand::remote_call("DiscoveryServerService", "mergeInventoryReport")
            .with_security_token("abc");
        assert_eq!(cmd.security_token(), Some("abc"));
    }

    #[test]
    fn test_empty_token_counts_as_absent() {
        let cmd = InboundCommand::remote_call("X", "y").with_security_token("");
        assert_eq!(cmd.security_token(), None);
    }

    #[test]
    fn test_response_serde_tag() {
        let json = serde_json::to_value(CommandResponse::Rejected {
            reason: "no token".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "rejected");
    }
}
