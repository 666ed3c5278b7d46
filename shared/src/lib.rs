use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod slots;

pub use slots::{
    booking_window, find_self_conflict, overlaps, total_amount, total_duration_minutes,
    validate_slots, SlotError, SlotInput, ValidatedSlot,
};

pub const DEFAULT_CURRENCY: &str = "KES";

/// Closed set of user roles. Stored as strings in the database but parsed
/// into this enum at the authentication boundary so role checks cannot drift
/// per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Artist,
    StudioManager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Artist => "artist",
            Role::StudioManager => "studio_manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" => Ok(Role::Artist),
            "studio_manager" => Ok(Role::StudioManager),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// Actions gated by role. Per-object ownership (own studio, own booking) is
/// checked at the handler against the loaded row; this matrix covers the
/// role dimension only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateBooking,
    UpdateBookingStatus,
    DeleteBooking,
    CreateStudio,
    ManageStudio,
    CreateManager,
    InitiatePayment,
}

pub fn can_perform(role: Role, action: Action) -> bool {
    use Action::*;
    match role {
        // Admins administer; booking creation belongs to artists only.
        Role::Admin => !matches!(action, CreateBooking),
        Role::StudioManager => matches!(action, UpdateBookingStatus | CreateStudio | ManageStudio),
        Role::Artist => matches!(action, CreateBooking | InitiatePayment),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal bookings reject further status updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Completed and failed payments are only ever written once; a repeated
    /// gateway callback against a terminal payment is a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(()),
        }
    }
}

/// How a studio collects money: a paybill number (bill-pay) or a till number
/// (buy-goods). Exactly one of the two numbers is meaningful, selected by
/// this discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentChannel {
    Paybill,
    Till,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::Paybill => "paybill",
            PaymentChannel::Till => "till",
        }
    }

    /// The STK push transaction type the gateway expects for this channel.
    pub fn transaction_type(&self) -> &'static str {
        match self {
            PaymentChannel::Paybill => "CustomerPayBillOnline",
            PaymentChannel::Till => "CustomerBuyGoodsOnline",
        }
    }
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentChannel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paybill" => Ok(PaymentChannel::Paybill),
            "till" => Ok(PaymentChannel::Till),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Artist, Role::StudioManager, Role::Admin] {
            assert_eq!(Role::from_str(role.as_str()), Ok(role));
        }
        assert!(Role::from_str("superuser").is_err());
    }

    #[test]
    fn capability_matrix() {
        use Action::*;

        assert!(can_perform(Role::Artist, CreateBooking));
        assert!(can_perform(Role::Artist, InitiatePayment));
        assert!(!can_perform(Role::Artist, UpdateBookingStatus));
        assert!(!can_perform(Role::Artist, DeleteBooking));
        assert!(!can_perform(Role::Artist, CreateStudio));
        assert!(!can_perform(Role::Artist, CreateManager));

        assert!(can_perform(Role::StudioManager, UpdateBookingStatus));
        assert!(can_perform(Role::StudioManager, CreateStudio));
        assert!(can_perform(Role::StudioManager, ManageStudio));
        assert!(!can_perform(Role::StudioManager, CreateBooking));
        assert!(!can_perform(Role::StudioManager, DeleteBooking));
        assert!(!can_perform(Role::StudioManager, InitiatePayment));
        assert!(!can_perform(Role::StudioManager, CreateManager));

        for action in [
            UpdateBookingStatus,
            DeleteBooking,
            CreateStudio,
            ManageStudio,
            CreateManager,
            InitiatePayment,
        ] {
            assert!(can_perform(Role::Admin, action));
        }
        assert!(!can_perform(Role::Admin, CreateBooking));
    }

    #[test]
    fn terminal_booking_statuses() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn terminal_payment_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn channel_transaction_types() {
        assert_eq!(
            PaymentChannel::Paybill.transaction_type(),
            "CustomerPayBillOnline"
        );
        assert_eq!(
            PaymentChannel::Till.transaction_type(),
            "CustomerBuyGoodsOnline"
        );
        assert_eq!(PaymentChannel::from_str("till"), Ok(PaymentChannel::Till));
        assert!(PaymentChannel::from_str("cash").is_err());
    }
}
