use crate::error::{WorkflowError, WorkflowResult};
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Faculty => "FACULTY",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Self::Student),
            "FACULTY" => Some(Self::Faculty),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The authenticated caller, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub department_id: Option<String>,
    pub is_hod: bool,
}

impl Actor {
    pub fn is_hod_of(&self, department_id: &str) -> bool {
        match self.role {
            Role::Faculty => self.is_hod && self.department_id.as_deref() == Some(department_id),
            Role::Student | Role::Admin => false,
        }
    }

    pub fn require_faculty(&self) -> WorkflowResult<()> {
        match self.role {
            Role::Faculty => Ok(()),
            Role::Student | Role::Admin => Err(WorkflowError::Unauthorized(
                "faculty role required".to_string(),
            )),
        }
    }

    pub fn require_hod_of(&self, department_id: &str) -> WorkflowResult<()> {
        if self.is_hod_of(department_id) {
            Ok(())
        } else {
            Err(WorkflowError::Unauthorized(
                "HOD of the course's department required".to_string(),
            ))
        }
    }

    pub fn require_admin(&self) -> WorkflowResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Student | Role::Faculty => Err(WorkflowError::Unauthorized(
                "admin role required".to_string(),
            )),
        }
    }

    pub fn require_admin_or_hod_of(&self, department_id: &str) -> WorkflowResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            _ if self.is_hod_of(department_id) => Ok(()),
            _ => Err(WorkflowError::Unauthorized(
                "admin or HOD of the course's department required".to_string(),
            )),
        }
    }
}

pub fn resolve_actor(conn: &Connection, user_id: &str) -> WorkflowResult<Actor> {
    let row: Option<(String, Option<String>, i64)> = conn
        .query_row(
            "SELECT role, department_id, is_hod FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((role_raw, department_id, is_hod)) = row else {
        return Err(WorkflowError::Unauthorized(format!("unknown user {}", user_id)));
    };
    let role = Role::parse(&role_raw)
        .ok_or_else(|| WorkflowError::Corrupt(format!("user role {}", role_raw)))?;
    Ok(Actor {
        user_id: user_id.to_string(),
        role,
        department_id,
        is_hod: role == Role::Faculty && is_hod != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role, dept: Option<&str>, is_hod: bool) -> Actor {
        Actor {
            user_id: "u1".to_string(),
            role,
            department_id: dept.map(|d| d.to_string()),
            is_hod,
        }
    }

    #[test]
    fn hod_capability_is_scoped_to_department() {
        let hod = actor(Role::Faculty, Some("cse"), true);
        assert!(hod.require_hod_of("cse").is_ok());
        assert!(matches!(
            hod.require_hod_of("ece"),
            Err(WorkflowError::Unauthorized(_))
        ));
    }

    #[test]
    fn plain_faculty_and_admin_are_not_hod() {
        assert!(!actor(Role::Faculty, Some("cse"), false).is_hod_of("cse"));
        // The flag only means something on faculty.
        assert!(!actor(Role::Admin, Some("cse"), true).is_hod_of("cse"));
        assert!(!actor(Role::Student, Some("cse"), true).is_hod_of("cse"));
    }

    #[test]
    fn admin_passes_admin_or_hod_check() {
        assert!(actor(Role::Admin, None, false)
            .require_admin_or_hod_of("cse")
            .is_ok());
        assert!(actor(Role::Student, Some("cse"), false)
            .require_admin_or_hod_of("cse")
            .is_err());
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("faculty"), Some(Role::Faculty));
        assert_eq!(Role::parse("HOD"), None);
    }
}
