use std::collections::HashSet;

use ulid::Ulid;

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Member,
    Trainer,
}

impl Role {
    /// Parse a role token from the gateway header. Unknown tokens are
    /// dropped by the caller rather than failing the request.
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            "trainer" => Some(Role::Trainer),
            _ => None,
        }
    }
}

/// The authenticated caller, as asserted by the gateway in front of us.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Ulid,
    pub display_name: String,
    pub roles: HashSet<Role>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn require_admin(&self) -> Result<(), EngineError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Unauthorized("administrator role required"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(roles: &[Role]) -> CurrentUser {
        CurrentUser {
            id: Ulid::new(),
            display_name: "test".into(),
            roles: roles.iter().copied().collect(),
        }
    }

    #[test]
    fn parse_roles() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" Member "), Some(Role::Member));
        assert_eq!(Role::parse("TRAINER"), Some(Role::Trainer));
        assert_eq!(Role::parse("janitor"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn admin_gate() {
        assert!(user_with(&[Role::Admin]).require_admin().is_ok());
        assert!(user_with(&[Role::Admin, Role::Member]).require_admin().is_ok());
        assert!(matches!(
            user_with(&[Role::Member]).require_admin(),
            Err(EngineError::Unauthorized(_))
        ));
        assert!(user_with(&[]).require_admin().is_err());
    }
}
