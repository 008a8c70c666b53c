#[derive(Debug, Copy, Clone, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin = 1,
    Supervisor = 2,
    Worker = 3,
    Driver = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Supervisor),
            3 => Some(Role::Worker),
            4 => Some(Role::Driver),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Roles that work tasks in the field
    pub fn is_field_staff(self) -> bool {
        matches!(self, Role::Worker | Role::Driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for role in [Role::Admin, Role::Supervisor, Role::Worker, Role::Driver] {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(5), None);
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(Role::Supervisor.to_string(), "supervisor");
    }
}
