// src/connection/session.rs

//! Defines the authentication state associated with a client connection.

use serde::Serialize;

/// How the client last authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// No bind has completed, or the last bind was anonymous.
    #[default]
    Anonymous,
    Simple,
    Sasl,
}

/// Holds the authentication state of a single client connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// The DN the client is bound as. `None` while unauthenticated.
    pub bind_dn: Option<String>,
    pub auth_method: AuthMethod,
    /// The SASL mechanism of the last successful SASL bind.
    pub sasl_mechanism: Option<String>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drops any established identity. A new bind always starts here.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_authenticated(&self) -> bool {
        self.bind_dn.is_some()
    }

    /// The DN shown in monitoring output; empty when unauthenticated.
    pub fn display_dn(&self) -> &str {
        self.bind_dn.as_deref().unwrap_or("")
    }
}
