mod availability;
mod booking;
mod catalog;
mod cubicle;
mod error;
mod laptop;
mod loan;
mod queries;

pub use availability::{AvailabilityFilter, ResourceAvailability};
pub use error::{EngineError, ErrorCategory};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::policy::FacilityPolicy;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedBooking = Arc<RwLock<BookingRecord>>;
pub type SharedLoan = Arc<RwLock<LoanRecord>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The lifecycle engine. Holds every resource, booking, and loan in
/// memory, persists each mutation to the WAL before applying it, and
/// rebuilds the whole state by replay on startup.
///
/// Lock discipline: a mutation locks the record (booking/loan) first,
/// then the resource, and never holds two resources at once. Reads
/// take the same locks shared.
pub struct Engine {
    pub resources: DashMap<Ulid, SharedResourceState>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) loans: DashMap<Ulid, SharedLoan>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: FacilityPolicy,
}

// ── Event application ────────────────────────────────────
//
// Shared by the live mutation path and startup replay, so both agree
// byte for byte on what an event means. No locking — the caller holds
// whatever lock protects the target.

fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::ResourceStatusChanged { status, .. } => {
            rs.status = *status;
        }
        Event::LaptopReserved { id, date, window, .. }
        | Event::CubicleReserved { id, date, window, .. } => {
            rs.schedule.insert(*date, *window, *id);
        }
        Event::CheckedIn { booking_id, .. } => {
            rs.occupied_by = Some(*booking_id);
        }
        Event::BookingFinalized { id, .. } => {
            // interval stays as history; only the walk-in occupancy clears
            if rs.occupied_by == Some(*id) {
                rs.occupied_by = None;
            }
        }
        Event::BookingCancelled { id, date, .. } => {
            rs.schedule.release(*date, *id);
            if rs.occupied_by == Some(*id) {
                rs.occupied_by = None;
            }
        }
        Event::LoanRequested { id, .. } => {
            rs.active_loan = Some(*id);
        }
        Event::LoanReturned { .. } | Event::LoanCancelled { .. } => {
            rs.active_loan = None;
        }
        // no resource-side effect
        Event::InvitationAnswered { .. }
        | Event::BookingConfirmed { .. }
        | Event::LoanDelivered { .. } => {}
        // handled at the map level, not here
        Event::ResourceRegistered { .. } | Event::ResourceRemoved { .. } => {}
    }
}

fn apply_to_booking(record: &mut BookingRecord, event: &Event) {
    match event {
        Event::InvitationAnswered { person, accepted, .. } => {
            if let BookingKind::Cubicle { party } = &mut record.kind
                && let Some(member) = party.iter_mut().find(|m| m.person == *person)
            {
                member.consent = if *accepted { Consent::Accepted } else { Consent::Rejected };
            }
        }
        Event::BookingConfirmed { .. } => {
            record.state = ReservationState::Active;
        }
        Event::CheckedIn { staff, .. } => {
            record.checked_in_by = Some(*staff);
        }
        Event::BookingFinalized { .. } => {
            record.state = ReservationState::Finalized;
        }
        Event::BookingCancelled { .. } => {
            record.state = ReservationState::Cancelled;
        }
        _ => {}
    }
}

fn apply_to_loan(record: &mut LoanRecord, event: &Event) {
    match event {
        Event::LoanDelivered { staff, .. } => {
            record.delivered_by = Some(*staff);
        }
        Event::LoanReturned { returned_on, late, .. } => {
            record.returned_on = Some(*returned_on);
            record.state = if *late { LoanState::FinalizedLate } else { LoanState::Finalized };
        }
        Event::LoanCancelled { .. } => {
            record.state = LoanState::Cancelled;
        }
        _ => {}
    }
}

/// Booking record constructed from its creation event. Replay and
/// compaction both depend on this being the only way records are born.
fn booking_from_event(event: &Event) -> Option<BookingRecord> {
    match event {
        Event::LaptopReserved { id, resource_id, holder, date, window, created_at } => {
            Some(BookingRecord {
                id: *id,
                resource_id: *resource_id,
                holder: *holder,
                date: *date,
                window: *window,
                state: ReservationState::Active,
                kind: BookingKind::Laptop,
                checked_in_by: None,
                created_at: *created_at,
            })
        }
        Event::CubicleReserved { id, resource_id, holder, date, window, invitees, created_at } => {
            let mut party = Vec::with_capacity(invitees.len() + 1);
            party.push(Membership { person: *holder, consent: Consent::Accepted });
            party.extend(invitees.iter().map(|p| Membership {
                person: *p,
                consent: Consent::Pending,
            }));
            Some(BookingRecord {
                id: *id,
                resource_id: *resource_id,
                holder: *holder,
                date: *date,
                window: *window,
                state: ReservationState::Pending,
                kind: BookingKind::Cubicle { party },
                checked_in_by: None,
                created_at: *created_at,
            })
        }
        _ => None,
    }
}

fn loan_from_event(event: &Event) -> Option<LoanRecord> {
    match event {
        Event::LoanRequested { id, copy_id, borrower, start_date, end_date, created_at } => {
            Some(LoanRecord {
                id: *id,
                copy_id: *copy_id,
                borrower: *borrower,
                start_date: *start_date,
                end_date: *end_date,
                state: LoanState::Open,
                delivered_by: None,
                returned_on: None,
                created_at: *created_at,
            })
        }
        _ => None,
    }
}

/// Resource the event applies to, for replay routing. Creation and
/// removal of resources are handled at the map level and excluded.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceStatusChanged { id, .. } => Some(*id),
        Event::LaptopReserved { resource_id, .. }
        | Event::CubicleReserved { resource_id, .. }
        | Event::InvitationAnswered { resource_id, .. }
        | Event::BookingConfirmed { resource_id, .. }
        | Event::CheckedIn { resource_id, .. }
        | Event::BookingFinalized { resource_id, .. }
        | Event::BookingCancelled { resource_id, .. } => Some(*resource_id),
        Event::LoanRequested { copy_id, .. }
        | Event::LoanDelivered { copy_id, .. }
        | Event::LoanReturned { copy_id, .. }
        | Event::LoanCancelled { copy_id, .. } => Some(*copy_id),
        Event::ResourceRegistered { .. } | Event::ResourceRemoved { .. } => None,
    }
}

/// Booking a transition event targets. Creation events are excluded —
/// those build the record instead of mutating it.
fn event_booking_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::InvitationAnswered { booking_id, .. } | Event::CheckedIn { booking_id, .. } => {
            Some(*booking_id)
        }
        Event::BookingConfirmed { id, .. }
        | Event::BookingFinalized { id, .. }
        | Event::BookingCancelled { id, .. } => Some(*id),
        _ => None,
    }
}

fn event_loan_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::LoanDelivered { id, .. }
        | Event::LoanReturned { id, .. }
        | Event::LoanCancelled { id, .. } => Some(*id),
        _ => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        policy: FacilityPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
            loans: DashMap::new(),
            wal_tx,
            notify,
            clock,
            policy,
        };

        // Replay — we're the sole owner of every Arc here, so try_write
        // always succeeds instantly. Never block_on a lock in this loop:
        // it may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceRegistered { id, kind } => {
                    let rs = ResourceState::new(*id, kind.clone());
                    engine.resources.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceRemoved { id } => {
                    engine.resources.remove(id);
                }
                other => {
                    if let Some(record) = booking_from_event(other) {
                        engine
                            .bookings
                            .insert(record.id, Arc::new(RwLock::new(record)));
                    } else if let Some(record) = loan_from_event(other) {
                        engine.loans.insert(record.id, Arc::new(RwLock::new(record)));
                    } else if let Some(booking_id) = event_booking_id(other)
                        && let Some(entry) = engine.bookings.get(&booking_id)
                    {
                        let mut guard =
                            entry.try_write().expect("replay: uncontended write");
                        apply_to_booking(&mut guard, other);
                    } else if let Some(loan_id) = event_loan_id(other)
                        && let Some(entry) = engine.loans.get(&loan_id)
                    {
                        let mut guard =
                            entry.try_write().expect("replay: uncontended write");
                        apply_to_loan(&mut guard, other);
                    }

                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.resources.get(&resource_id)
                    {
                        let mut guard =
                            entry.try_write().expect("replay: uncontended write");
                        apply_to_resource(&mut guard, other);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::RESOURCES_ACTIVE)
            .set(engine.resources.len() as f64);
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_loan(&self, id: &Ulid) -> Option<SharedLoan> {
        self.loans.get(id).map(|e| e.value().clone())
    }

    pub fn policy(&self) -> &FacilityPolicy {
        &self.policy
    }

    /// The engine's notion of now (injected clock).
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Persist a creation event and birth its record. Routed through
    /// `booking_from_event`/`loan_from_event` so the live path and
    /// replay construct records identically.
    pub(super) async fn commit_creation(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Some(record) = booking_from_event(event) {
            self.bookings
                .insert(record.id, Arc::new(RwLock::new(record)));
        } else if let Some(record) = loan_from_event(event) {
            self.loans.insert(record.id, Arc::new(RwLock::new(record)));
        }
        apply_to_resource(rs, event);
        self.notify.send(rs.id, event);
        Ok(())
    }

    /// WAL-append + apply + notify for a resource-only event.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event);
        self.notify.send(rs.id, event);
        Ok(())
    }

    /// Same, for an event touching a booking record and its resource.
    /// Caller holds both write locks, record acquired before resource.
    pub(super) async fn persist_booking_event(
        &self,
        rs: &mut ResourceState,
        record: &mut BookingRecord,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_booking(record, event);
        apply_to_resource(rs, event);
        self.notify.send(rs.id, event);
        Ok(())
    }

    /// For an event that only touches the booking record (invitation
    /// answers, quorum confirmation). The interval was committed at
    /// creation and does not move, so no resource lock is taken.
    pub(super) async fn persist_record_event(
        &self,
        record: &mut BookingRecord,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_booking(record, event);
        self.notify.send(record.resource_id, event);
        Ok(())
    }

    pub(super) async fn persist_loan_event(
        &self,
        rs: &mut ResourceState,
        record: &mut LoanRecord,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_loan(record, event);
        apply_to_resource(rs, event);
        self.notify.send(rs.id, event);
        Ok(())
    }

    // ── compaction ───────────────────────────────────────

    /// Minimal event sequence that rebuilds current state on replay.
    /// Resources first, then bookings and loans; per record, the
    /// creation event followed by just the transitions that survive in
    /// its present state.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for entry in self.resources.iter() {
            let rs = entry.value().read().await;
            events.push(Event::ResourceRegistered { id: rs.id, kind: rs.kind.clone() });
            if rs.status != AdminStatus::Available {
                events.push(Event::ResourceStatusChanged { id: rs.id, status: rs.status });
            }
        }

        for entry in self.bookings.iter() {
            let record = entry.value().read().await;
            events.extend(booking_history(&record));
        }

        for entry in self.loans.iter() {
            let record = entry.value().read().await;
            events.extend(loan_history(&record));
        }

        events
    }

    /// Rewrite the WAL down to the snapshot produced by
    /// `snapshot_events`. The writer task performs the two-phase file
    /// swap; appends queued behind the Compact command land in the
    /// fresh file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    // ── reaper support ───────────────────────────────────

    /// Pending group reservations whose window has fully passed.
    /// Skips records under contention; the next sweep catches them.
    pub fn collect_stale_pending(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut stale = Vec::new();
        for entry in self.bookings.iter() {
            let Ok(record) = entry.value().try_read() else {
                continue;
            };
            if record.state != ReservationState::Pending {
                continue;
            }
            let over = record.date < now.date()
                || (record.date == now.date() && record.window.end <= now.time());
            if over {
                stale.push(record.id);
            }
        }
        stale
    }
}

/// Events reconstructing one booking record, creation first.
fn booking_history(record: &BookingRecord) -> Vec<Event> {
    let mut events = Vec::new();

    match &record.kind {
        BookingKind::Laptop => {
            events.push(Event::LaptopReserved {
                id: record.id,
                resource_id: record.resource_id,
                holder: record.holder,
                date: record.date,
                window: record.window,
                created_at: record.created_at,
            });
        }
        BookingKind::Cubicle { party } => {
            events.push(Event::CubicleReserved {
                id: record.id,
                resource_id: record.resource_id,
                holder: record.holder,
                date: record.date,
                window: record.window,
                invitees: party
                    .iter()
                    .filter(|m| m.person != record.holder)
                    .map(|m| m.person)
                    .collect(),
                created_at: record.created_at,
            });
            for member in party {
                if member.person == record.holder || member.consent == Consent::Pending {
                    continue;
                }
                events.push(Event::InvitationAnswered {
                    booking_id: record.id,
                    resource_id: record.resource_id,
                    person: member.person,
                    accepted: member.consent == Consent::Accepted,
                });
            }
            // a group cancelled while still pending never confirmed
            if matches!(record.state, ReservationState::Active | ReservationState::Finalized) {
                events.push(Event::BookingConfirmed {
                    id: record.id,
                    resource_id: record.resource_id,
                });
            }
        }
    }

    if let Some(staff) = record.checked_in_by {
        events.push(Event::CheckedIn {
            booking_id: record.id,
            resource_id: record.resource_id,
            staff,
        });
    }
    match record.state {
        ReservationState::Finalized => events.push(Event::BookingFinalized {
            id: record.id,
            resource_id: record.resource_id,
        }),
        ReservationState::Cancelled => events.push(Event::BookingCancelled {
            id: record.id,
            resource_id: record.resource_id,
            date: record.date,
        }),
        ReservationState::Pending | ReservationState::Active => {}
    }

    events
}

fn loan_history(record: &LoanRecord) -> Vec<Event> {
    let mut events = vec![Event::LoanRequested {
        id: record.id,
        copy_id: record.copy_id,
        borrower: record.borrower,
        start_date: record.start_date,
        end_date: record.end_date,
        created_at: record.created_at,
    }];
    if let Some(staff) = record.delivered_by {
        events.push(Event::LoanDelivered { id: record.id, copy_id: record.copy_id, staff });
    }
    match record.state {
        LoanState::Finalized | LoanState::FinalizedLate => {
            if let Some(returned_on) = record.returned_on {
                events.push(Event::LoanReturned {
                    id: record.id,
                    copy_id: record.copy_id,
                    returned_on,
                    late: record.state == LoanState::FinalizedLate,
                });
            }
        }
        LoanState::Cancelled => {
            events.push(Event::LoanCancelled { id: record.id, copy_id: record.copy_id });
        }
        LoanState::Open => {}
    }
    events
}
