mod identity;
mod ids;
mod money;
mod reservation;
mod status;
mod ticket;

pub use identity::{Identity, Role};
pub use ids::{AttendeeId, EventId, ReservationId, TicketId, UserId, VenueId};
pub use money::Money;
pub use reservation::{
    AttendeeReservation, MAX_TICKETS_PER_RESERVATION, NewReservation, ReservationSummary,
    ValidationError,
};
pub use status::{PaymentStatus, UnknownStatus};
pub use ticket::{EventSchedule, IssuanceReport, Ticket, TicketDetail, TicketPayload};
