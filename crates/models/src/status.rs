use serde::{Deserialize, Serialize};

/// Payment state of an attendee reservation.
///
/// `Confirmed` is the only state that carries tickets and it is terminal:
/// once a reservation is confirmed the only accepted update is a replay of
/// `Confirmed` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown payment status {0:?}")]
pub struct UnknownStatus(pub String);

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Confirmed,
        PaymentStatus::Cancelled,
        PaymentStatus::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Maps a client or gateway supplied status onto the closed set.
    ///
    /// Call this once, where the raw string enters the system. Everything
    /// downstream works with the enum and never looks at the raw value again.
    pub fn normalize(raw: &str) -> Result<Self, UnknownStatus> {
        let key = raw.trim().to_ascii_lowercase();
        match key.as_str() {
            "pending" | "unpaid" => Ok(PaymentStatus::Pending),
            "confirmed" | "successful" | "succeeded" | "success" | "paid" | "completed" => {
                Ok(PaymentStatus::Confirmed)
            }
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            "failed" | "declined" | "payment_failed" => Ok(PaymentStatus::Failed),
            _ => Err(UnknownStatus(raw.to_string())),
        }
    }

    /// States from which a reservation may move into `self`.
    pub const fn predecessors(self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[PaymentStatus::Pending],
            PaymentStatus::Confirmed => &[
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                PaymentStatus::Confirmed,
            ],
            PaymentStatus::Cancelled => &[
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Failed => &[PaymentStatus::Pending, PaymentStatus::Failed],
        }
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        next.predecessors().contains(&self)
    }

    pub const fn issues_tickets(self) -> bool {
        matches!(self, PaymentStatus::Confirmed)
    }
}

/// Strict parser for values read back from storage. Synonyms are rejected.
impl std::str::FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}
