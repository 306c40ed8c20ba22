#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    AppointmentKind, AppointmentStateMachine, FixedClock, InMemoryAppointmentStore, NewAppointment, SlotTime,
    TransitionOutcome,
};
use notification_cell::{
    EventBus, InMemoryNotificationStore, NotificationDispatcher, NotificationStore, RealtimePublisher,
};
use shared_models::auth::Actor;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn hhmm(value: &str) -> SlotTime {
    SlotTime::parse(value).unwrap()
}

pub struct Harness {
    pub machine: Arc<AppointmentStateMachine>,
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub inbox: Arc<InMemoryNotificationStore>,
    pub bus: EventBus,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let inbox = Arc::new(InMemoryNotificationStore::new());
        Self::with_inbox(now, inbox.clone(), inbox)
    }

    /// Notification rows go to `notification_store`; `inbox` is what tests inspect.
    pub fn with_inbox(
        now: DateTime<Utc>,
        notification_store: Arc<dyn NotificationStore>,
        inbox: Arc<InMemoryNotificationStore>,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(InMemoryAppointmentStore::new());
        let bus = EventBus::new(16);
        let publisher: Arc<dyn RealtimePublisher> = Arc::new(bus.clone());
        let dispatcher = NotificationDispatcher::new(notification_store, publisher);
        let machine = Arc::new(AppointmentStateMachine::new(store.clone(), clock.clone(), dispatcher));

        Self {
            machine,
            clock,
            store,
            inbox,
            bus,
        }
    }

    pub async fn book(
        &self,
        patient: Actor,
        provider: Actor,
        day: NaiveDate,
        time: &str,
    ) -> Result<TransitionOutcome, appointment_cell::AppointmentError> {
        self.machine
            .create(
                patient,
                NewAppointment {
                    provider_id: provider.id,
                    date: day,
                    time: hhmm(time),
                    location: None,
                    kind: AppointmentKind::Consultation,
                    reason: "Persistent headaches".to_string(),
                    patient_notes: None,
                },
            )
            .await
    }

    pub async fn inbox_len(&self, actor: Actor) -> usize {
        self.inbox.list(actor.id, Default::default()).await.unwrap().len()
    }
}

pub fn patient() -> Actor {
    Actor::patient(Uuid::new_v4())
}

pub fn provider() -> Actor {
    Actor::provider(Uuid::new_v4())
}
