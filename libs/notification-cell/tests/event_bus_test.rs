use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use notification_cell::{
    EventBus, InMemoryNotificationStore, NotificationDispatcher, NotificationEvent, NotificationKind,
    NotificationStore, RealtimeEnvelope, RelatedEntity,
};
use shared_models::auth::Actor;

fn appointment_event(recipients: Vec<Uuid>) -> NotificationEvent {
    NotificationEvent {
        kind: NotificationKind::AppointmentAccepted,
        recipients,
        title: "Appointment accepted".to_string(),
        body: "Your provider accepted the appointment".to_string(),
        related_entity: Some(RelatedEntity::appointment(Uuid::new_v4())),
        payload: json!({ "status": "accepted" }),
    }
}

fn decode(frame: &str) -> RealtimeEnvelope {
    serde_json::from_str(frame).expect("frame should be a realtime envelope")
}

#[tokio::test]
async fn online_recipient_receives_the_persisted_row() {
    let bus = EventBus::new(8);
    let store = Arc::new(InMemoryNotificationStore::new());
    let dispatcher = NotificationDispatcher::new(store.clone(), Arc::new(bus.clone()));

    let patient = Actor::patient(Uuid::new_v4());
    let mut subscription = bus.join(patient);

    let report = dispatcher.dispatch(appointment_event(vec![patient.id])).await.unwrap();
    assert_eq!(report.delivered, 1);

    let frame = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    let envelope = decode(&frame);
    assert_eq!(envelope.event, "appointment.accepted");
    assert_eq!(envelope.data["notification"]["id"], json!(report.notifications[0].id));
    assert_eq!(envelope.data["payload"]["status"], "accepted");
}

#[tokio::test]
async fn offline_recipient_finds_the_row_after_connecting() {
    let bus = EventBus::new(8);
    let store = Arc::new(InMemoryNotificationStore::new());
    let dispatcher = NotificationDispatcher::new(store.clone(), Arc::new(bus.clone()));

    let provider = Actor::provider(Uuid::new_v4());
    let report = dispatcher.dispatch(appointment_event(vec![provider.id])).await.unwrap();
    assert_eq!(report.delivered, 0);

    // Connecting later does not replay the missed frame; the inbox holds it.
    let mut subscription = bus.join(provider);
    assert!(tokio::time::timeout(Duration::from_millis(50), subscription.recv())
        .await
        .is_err());

    let inbox = store.list(provider.id, Default::default()).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, report.notifications[0].id);
    assert_eq!(store.unread_count(provider.id).await.unwrap(), 1);
}

#[tokio::test]
async fn frames_stay_with_their_recipient() {
    let bus = EventBus::new(8);
    let store = Arc::new(InMemoryNotificationStore::new());
    let dispatcher = NotificationDispatcher::new(store, Arc::new(bus.clone()));

    let patient = Actor::patient(Uuid::new_v4());
    let bystander = Actor::patient(Uuid::new_v4());
    let mut patient_sub = bus.join(patient);
    let mut bystander_sub = bus.join(bystander);

    dispatcher.dispatch(appointment_event(vec![patient.id])).await.unwrap();

    assert!(patient_sub.recv().await.is_some());
    assert!(tokio::time::timeout(Duration::from_millis(50), bystander_sub.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn disconnect_makes_actor_offline() {
    let bus = EventBus::new(8);
    let actor = Actor::patient(Uuid::new_v4());
    {
        let _subscription = bus.join(actor);
        assert!(bus.is_online(actor.id));
    }
    assert!(!bus.is_online(actor.id));
    assert_eq!(bus.online_count(), 0);
}
