use specta::Type;

pub mod debounce;
pub mod deployment;
pub mod format;
pub mod order_number;
pub mod status;
pub mod validation;

/// Who owns a device.
///
/// Stored as the lowercase German label (`eigen` / `miete`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Eigen,
    Miete,
}

impl Ownership {
    pub fn as_str(self) -> &'static str {
        match self {
            Ownership::Eigen => "eigen",
            Ownership::Miete => "miete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "eigen" => Some(Ownership::Eigen),
            "miete" => Some(Ownership::Miete),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Aktiv,
    Inaktiv,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Aktiv => "aktiv",
            OrderStatus::Inaktiv => "inaktiv",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "aktiv" => Some(OrderStatus::Aktiv),
            "inaktiv" => Some(OrderStatus::Inaktiv),
            _ => None,
        }
    }
}

/// Profile role. Admins manage reference data and users.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_storage_labels() {
        for o in [Ownership::Eigen, Ownership::Miete] {
            assert_eq!(Ownership::parse(o.as_str()), Some(o));
        }
        for s in [OrderStatus::Aktiv, OrderStatus::Inaktiv] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        for r in [Role::Admin, Role::User] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert_eq!(Ownership::parse("leasing"), None);
        assert_eq!(OrderStatus::parse("offen"), None);
        assert_eq!(Role::parse("root"), None);
    }
}
