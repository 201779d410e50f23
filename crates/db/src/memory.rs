//! In-process store for tests and local experiments.
//!
//! Mirrors the PostgreSQL store closely enough to exercise the issuance
//! protocol: one async mutex per reservation stands in for the row lock,
//! inserted tickets stay staged until commit, and faults can be injected
//! into the n-th ticket insert.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use boxoffice_models::{
    AttendeeId, AttendeeReservation, EventId, EventSchedule, NewReservation, PaymentStatus,
    ReservationId, ReservationSummary, Ticket, TicketDetail, TicketId, UserId,
};
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::error::{IssuanceError, StoreError};
use crate::store::{IssuanceBackend, LockedReservation, LockedScope, ReservationStore, StatusChange};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    key_locks: Mutex<HashMap<ReservationId, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<Faults>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct State {
    next_id: i64,
    attendees: HashMap<UserId, AttendeeId>,
    events: HashMap<EventId, (EventSchedule, Option<String>)>,
    reservations: BTreeMap<ReservationId, AttendeeReservation>,
    tickets: Vec<Ticket>,
}

#[derive(Default)]
struct Faults {
    fail_insert_at: Option<i32>,
    insert_delay: Option<Duration>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_locks(&self) -> MutexGuard<'_, HashMap<ReservationId, Arc<tokio::sync::Mutex<()>>>> {
        self.key_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_lock(&self, reservation_id: ReservationId) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks().entry(reservation_id).or_default().clone()
    }

    /// Forgets the mutex of `reservation_id` once the map holds the only
    /// reference. Call after the guard is dropped. Waiters keep their own
    /// clone, so an entry somebody is queued on survives.
    fn release_key_lock(&self, reservation_id: ReservationId) {
        let mut locks = self.key_locks();
        if locks
            .get(&reservation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&reservation_id);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                key_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                lock_timeout,
            }),
        }
    }

    /// Registers an event. The id inside `schedule` is kept as given.
    pub fn add_event(&self, schedule: EventSchedule, venue_name: Option<&str>) {
        let mut state = self.inner.state();
        state
            .events
            .insert(schedule.event_id, (schedule, venue_name.map(str::to_string)));
    }

    pub fn remove_event(&self, event_id: EventId) {
        self.inner.state().events.remove(&event_id);
    }

    /// Makes the insert of ticket number `n` fail, in every later issuance.
    pub fn fail_ticket_insert_at(&self, n: i32) {
        self.inner.faults().fail_insert_at = Some(n);
    }

    pub fn clear_faults(&self) {
        *self.inner.faults() = Faults::default();
    }

    /// Sleeps before each staged insert, widening race windows in tests.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.inner.faults().insert_delay = Some(delay);
    }

    pub fn reservation(&self, reservation_id: ReservationId) -> Option<AttendeeReservation> {
        self.inner.state().reservations.get(&reservation_id).cloned()
    }

    /// Committed tickets of one reservation, in ticket-number order.
    pub fn tickets_for(&self, reservation_id: ReservationId) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .inner
            .state()
            .tickets
            .iter()
            .filter(|t| t.reservation_id == reservation_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.ticket_number);
        tickets
    }

    /// Overwrites stored fields directly, bypassing every rule. Used to
    /// build states the public operations never produce.
    pub fn tamper(&self, reservation_id: ReservationId, edit: impl FnOnce(&mut AttendeeReservation)) {
        if let Some(reservation) = self.inner.state().reservations.get_mut(&reservation_id) {
            edit(reservation);
        }
    }

    /// Holds the issuance lock of a reservation until the guard is dropped.
    pub async fn hold_issuance_lock(&self, reservation_id: ReservationId) -> OwnedMutexGuard<()> {
        self.inner.key_lock(reservation_id).lock_owned().await
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn find_attendee(&self, user_id: UserId) -> Result<Option<AttendeeId>, StoreError> {
        Ok(self.inner.state().attendees.get(&user_id).copied())
    }

    async fn ensure_attendee(&self, user_id: UserId) -> Result<AttendeeId, StoreError> {
        let mut state = self.inner.state();
        if let Some(id) = state.attendees.get(&user_id) {
            return Ok(*id);
        }
        let id = AttendeeId(state.next_id());
        state.attendees.insert(user_id, id);
        Ok(id)
    }

    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
    ) -> Result<Option<AttendeeReservation>, StoreError> {
        Ok(self
            .reservation(reservation_id)
            .filter(|r| r.attendee_id == attendee_id))
    }

    async fn insert_reservation(
        &self,
        attendee_id: AttendeeId,
        request: &NewReservation,
    ) -> Result<AttendeeReservation, StoreError> {
        let mut state = self.inner.state();
        if !state.events.contains_key(&request.event_id()) {
            return Err(StoreError::UnknownEvent(request.event_id()));
        }
        let reservation = AttendeeReservation {
            reservation_id: ReservationId(state.next_id()),
            attendee_id,
            event_id: request.event_id(),
            quantity: request.quantity(),
            total_price: request.total_price(),
            payment_status: PaymentStatus::Pending,
            created_at: Utc::now(),
        };
        state
            .reservations
            .insert(reservation.reservation_id, reservation.clone());
        Ok(reservation)
    }

    async fn update_payment_status(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
        status: PaymentStatus,
    ) -> Result<StatusChange, StoreError> {
        let mut state = self.inner.state();
        let Some(reservation) = state
            .reservations
            .get_mut(&reservation_id)
            .filter(|r| r.attendee_id == attendee_id)
        else {
            return Ok(StatusChange::NotFound);
        };
        if !reservation.payment_status.can_transition_to(status) {
            return Ok(StatusChange::Rejected(reservation.payment_status));
        }
        reservation.payment_status = status;
        Ok(StatusChange::Updated)
    }

    async fn reservations_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<ReservationSummary>, StoreError> {
        let state = self.inner.state();
        let mut rows: Vec<ReservationSummary> = state
            .reservations
            .values()
            .filter(|r| r.attendee_id == attendee_id)
            .filter_map(|r| {
                let (event, _) = state.events.get(&r.event_id)?;
                Some(ReservationSummary {
                    reservation: r.clone(),
                    event_title: event.name.clone(),
                    event_date: event.start_date,
                    event_time: event.start_time,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (b.reservation.created_at, b.reservation.reservation_id)
                .cmp(&(a.reservation.created_at, a.reservation.reservation_id))
        });
        Ok(rows)
    }

    async fn confirmed_tickets_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<TicketDetail>, StoreError> {
        let state = self.inner.state();
        let mut rows: Vec<TicketDetail> = state
            .tickets
            .iter()
            .filter_map(|ticket| {
                let reservation = state.reservations.get(&ticket.reservation_id)?;
                if reservation.attendee_id != attendee_id
                    || reservation.payment_status != PaymentStatus::Confirmed
                {
                    return None;
                }
                let (event, venue_name) = state.events.get(&reservation.event_id)?;
                Some(TicketDetail {
                    ticket: ticket.clone(),
                    event_name: event.name.clone(),
                    event_date: event.start_date,
                    venue_name: venue_name.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.ticket
                .created_at
                .cmp(&a.ticket.created_at)
                .then(b.ticket.reservation_id.cmp(&a.ticket.reservation_id))
                .then(a.ticket.ticket_number.cmp(&b.ticket.ticket_number))
        });
        Ok(rows)
    }

    async fn delete_expired_pending(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.inner.state();
        let before = state.reservations.len();
        state
            .reservations
            .retain(|_, r| !(r.payment_status == PaymentStatus::Pending && r.created_at < cutoff));
        let live: Vec<ReservationId> = state.reservations.keys().copied().collect();
        state.tickets.retain(|t| live.contains(&t.reservation_id));
        Ok((before - state.reservations.len()) as u64)
    }

    async fn confirmed_without_tickets(
        &self,
        after: Option<ReservationId>,
        limit: u32,
    ) -> Result<Vec<ReservationId>, StoreError> {
        let state = self.inner.state();
        Ok(state
            .reservations
            .values()
            .filter(|r| after.is_none_or(|after| r.reservation_id > after))
            .filter(|r| r.payment_status == PaymentStatus::Confirmed)
            .filter(|r| !state.tickets.iter().any(|t| t.reservation_id == r.reservation_id))
            .map(|r| r.reservation_id)
            .take(limit as usize)
            .collect())
    }
}

/// Holds the per-reservation mutex; staged tickets become visible on commit.
pub struct MemoryScope {
    inner: Arc<Inner>,
    reservation_id: ReservationId,
    staged: Vec<Ticket>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        // Unlock first; the guard owns a clone of the mutex.
        self.guard.take();
        self.inner.release_key_lock(self.reservation_id);
    }
}

#[async_trait]
impl IssuanceBackend for MemoryStore {
    type Scope = MemoryScope;

    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<(MemoryScope, LockedReservation)>, IssuanceError> {
        let key = self.inner.key_lock(reservation_id);
        let guard = tokio::time::timeout(self.inner.lock_timeout, key.lock_owned())
            .await
            .map_err(|_| IssuanceError::LockTimeout(reservation_id))?;

        let Some(reservation) = self.reservation(reservation_id) else {
            drop(guard);
            self.inner.release_key_lock(reservation_id);
            return Ok(None);
        };
        let locked = LockedReservation {
            reservation_id,
            attendee_id: reservation.attendee_id,
            event_id: reservation.event_id,
            quantity: reservation.quantity,
            payment_status: reservation.payment_status,
        };
        let scope = MemoryScope {
            inner: self.inner.clone(),
            reservation_id,
            staged: Vec::new(),
            guard: Some(guard),
        };
        Ok(Some((scope, locked)))
    }
}

#[async_trait]
impl LockedScope for MemoryScope {
    async fn ticket_count(&mut self) -> Result<i64, IssuanceError> {
        let state = self.inner.state();
        let count = state
            .tickets
            .iter()
            .filter(|t| t.reservation_id == self.reservation_id)
            .count();
        Ok(count as i64)
    }

    async fn event_schedule(
        &mut self,
        event_id: EventId,
    ) -> Result<Option<EventSchedule>, IssuanceError> {
        Ok(self.inner.state().events.get(&event_id).map(|(e, _)| e.clone()))
    }

    async fn insert_ticket(
        &mut self,
        ticket_number: i32,
        payload: &str,
    ) -> Result<TicketId, IssuanceError> {
        let (fail_at, delay) = {
            let faults = self.inner.faults();
            (faults.fail_insert_at, faults.insert_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail_at == Some(ticket_number) {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "injected failure inserting ticket {ticket_number}"
            )))
            .into());
        }
        let ticket_id = TicketId(self.inner.state().next_id());
        self.staged.push(Ticket {
            ticket_id,
            reservation_id: self.reservation_id,
            ticket_number,
            payload: payload.to_string(),
            created_at: Utc::now(),
        });
        Ok(ticket_id)
    }

    async fn commit(mut self) -> Result<(), IssuanceError> {
        let staged = std::mem::take(&mut self.staged);
        let mut state = self.inner.state();
        let duplicate = staged.iter().any(|staged| {
            state.tickets.iter().any(|t| {
                t.reservation_id == staged.reservation_id && t.ticket_number == staged.ticket_number
            })
        });
        if duplicate {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "duplicate (reservation_id, ticket_number)".to_string(),
            ))
            .into());
        }
        state.tickets.extend(staged);
        Ok(())
    }

    async fn rollback(self) -> Result<(), IssuanceError> {
        Ok(())
    }
}
