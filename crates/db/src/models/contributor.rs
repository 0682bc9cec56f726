use serde::Serialize;
use ts_rs::TS;

/// Who is answering tasks: a registered user, or an anonymous volunteer
/// identified by IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, TS)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Contributor {
    User(i64),
    Anonymous(String),
}

impl Contributor {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Contributor::User(id) => Some(*id),
            Contributor::Anonymous(_) => None,
        }
    }

    pub fn user_ip(&self) -> Option<&str> {
        match self {
            Contributor::User(_) => None,
            Contributor::Anonymous(ip) => Some(ip),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Contributor::Anonymous(_))
    }

    /// Stable textual key, `user:{id}` or `ip:{addr}`.
    pub fn key(&self) -> String {
        match self {
            Contributor::User(id) => format!("user:{id}"),
            Contributor::Anonymous(ip) => format!("ip:{ip}"),
        }
    }
}
