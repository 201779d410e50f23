use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Attendee,
    VenueOwner,
    Admin,
    Vendor,
}

impl Role {
    /// Parses the role names issued by the identity provider, including the
    /// legacy `regular` spelling for attendees.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "organizer" => Some(Role::Organizer),
            "attendee" | "regular" | "user" => Some(Role::Attendee),
            "venue_owner" | "venueowner" => Some(Role::VenueOwner),
            "admin" => Some(Role::Admin),
            "vendor" => Some(Role::Vendor),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Organizer => "organizer",
            Role::Attendee => "attendee",
            Role::VenueOwner => "venue_owner",
            Role::Admin => "admin",
            Role::Vendor => "vendor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A verified caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}
