use rusqlite::{Connection, OptionalExtension};

use super::error::ApiError;
use super::types::Request;
use crate::domain::Role;

/// The authenticated caller, resolved from the request token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// `None` when the user has no profile row.
    pub role: Option<Role>,
}

impl Identity {
    /// The one authorization check every role-gated route goes through.
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == Some(role) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Role used for display; users without a profile read as students.
    pub fn effective_role(&self) -> Role {
        self.role.unwrap_or(Role::Student)
    }
}

pub fn authenticate(conn: &Connection, req: &Request) -> Result<Identity, ApiError> {
    let Some(token) = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(ApiError::Unauthorized(
            "Authentication credentials were not provided.".to_string(),
        ));
    };

    let row = conn
        .query_row(
            "SELECT u.id, u.username, u.email, u.first_name, u.last_name, p.role
             FROM auth_tokens t
             JOIN users u ON u.id = t.user_id
             LEFT JOIN user_profiles p ON p.user_id = u.id
             WHERE t.key = ?",
            [token],
            |r| {
                let role: Option<String> = r.get(5)?;
                Ok(Identity {
                    user_id: r.get(0)?,
                    username: r.get(1)?,
                    email: r.get(2)?,
                    first_name: r.get(3)?,
                    last_name: r.get(4)?,
                    role: role.as_deref().and_then(Role::parse),
                })
            },
        )
        .optional()?;

    row.ok_or_else(|| ApiError::Unauthorized("Invalid token.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: Option<Role>) -> Identity {
        Identity {
            user_id: 1,
            username: "u".to_string(),
            email: "u@example.org".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            role,
        }
    }

    #[test]
    fn require_matches_exact_role() {
        assert!(identity(Some(Role::Admin)).require(Role::Admin).is_ok());
        assert!(matches!(
            identity(Some(Role::Teacher)).require(Role::Admin),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            identity(None).require(Role::Student),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn missing_profile_reads_as_student() {
        assert_eq!(identity(None).effective_role(), Role::Student);
    }
}
