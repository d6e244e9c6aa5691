// src/session.rs
//! Per-user session state carried between tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Regular User")]
    RegularUser,
    Expert,
    Administrator,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::RegularUser, Role::Expert, Role::Administrator];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegularUser => "Regular User",
            Self::Expert => "Expert",
            Self::Administrator => "Administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| UnknownRole(t.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Most recent Financial Query answer, possibly edited.
    #[serde(default)]
    pub last_result: Option<String>,
}

impl SessionContext {
    pub fn new(username: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            role,
            last_result: None,
        }
    }
}
