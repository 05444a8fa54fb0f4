//! Gateway behavior against the in-memory inventory.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{DrawId, IntegrationEvent, Money, OrderId, UserId};
use gateway::{
    CartItem, ClientFrame, EventPublisher, GatewayError, PushMessage, ReservationGateway,
    RoomRegistry,
};
use inventory::{CellStatus, DrawConfig, InMemoryNumberInventory, NumberInventory, NumberInventoryExt};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Clone, Default)]
struct RecordingPublisher {
    events: Arc<Mutex<Vec<IntegrationEvent>>>,
    fail: bool,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self {
            events: Arc::default(),
            fail: true,
        }
    }

    fn events(&self) -> Vec<IntegrationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), String> {
        if self.fail {
            return Err("bus unreachable".to_string());
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct Harness {
    inventory: Arc<InMemoryNumberInventory>,
    publisher: RecordingPublisher,
    gateway: ReservationGateway<InMemoryNumberInventory, RecordingPublisher>,
    draw_id: DrawId,
}

async fn harness(publisher: RecordingPublisher, max_number: i32, series: i32) -> Harness {
    let inventory = Arc::new(InMemoryNumberInventory::new());
    let draw_id = DrawId::new();
    inventory
        .configure_draw(DrawConfig {
            draw_id,
            min_number: 0,
            max_number,
            total_series: series,
            ticket_price: Money::from_cents(250),
        })
        .await
        .unwrap();
    let gateway = ReservationGateway::new(inventory.clone(), publisher.clone(), RoomRegistry::new());
    Harness {
        inventory,
        publisher,
        gateway,
        draw_id,
    }
}

fn drain(rx: &mut UnboundedReceiver<PushMessage>) -> Vec<PushMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn item(number: i32, quantity: usize) -> CartItem {
    CartItem { number, quantity }
}

#[tokio::test]
async fn test_join_sends_snapshot() {
    let h = harness(RecordingPublisher::default(), 9, 2).await;
    let (conn, mut rx) = h.gateway.rooms().connect().await;

    h.gateway.join_draw(conn, h.draw_id).await.unwrap();

    match drain(&mut rx).as_slice() {
        [PushMessage::AvailableNumbers {
            numbers,
            available_count,
            ..
        }] => {
            assert_eq!(numbers.len(), 10);
            assert_eq!(*available_count, 20);
        }
        other => panic!("unexpected messages {other:?}"),
    }
}

#[tokio::test]
async fn test_reserve_publishes_and_notifies() {
    let h = harness(RecordingPublisher::default(), 9, 3).await;
    let (buyer, mut buyer_rx) = h.gateway.rooms().connect().await;
    let (watcher, mut watcher_rx) = h.gateway.rooms().connect().await;
    h.gateway.join_draw(watcher, h.draw_id).await.unwrap();
    drain(&mut watcher_rx);

    let reservation = h
        .gateway
        .reserve(buyer, UserId::new(5), h.draw_id, &[item(4, 2), item(7, 1)], None)
        .await
        .unwrap();

    assert_eq!(reservation.cells.len(), 3);
    assert_eq!(reservation.confirmation.total_amount, Money::from_cents(750));
    assert!(reservation.confirmation.fallback_order_id.is_none());
    let mut fours: Vec<i32> = reservation
        .cells
        .iter()
        .filter(|c| c.number == 4)
        .map(|c| c.series)
        .collect();
    fours.sort();
    assert_eq!(fours, vec![1, 2]);

    let events = h.publisher.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        IntegrationEvent::NumbersReserved(data) => {
            assert_eq!(data.order_id, reservation.confirmation.order_id);
            assert_eq!(data.cell_ids.len(), 3);
            assert_eq!(data.unit_price, Money::from_cents(250));
            assert!(!data.is_add_to_existing);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let watcher_messages = drain(&mut watcher_rx);
    assert_eq!(watcher_messages.len(), 3);
    assert!(
        watcher_messages
            .iter()
            .all(|m| matches!(m, PushMessage::NumberReserved { .. }))
    );
    assert!(matches!(
        drain(&mut buyer_rx).as_slice(),
        [PushMessage::ReservationConfirmed(_)]
    ));
    assert_eq!(h.inventory.available_count(h.draw_id).await.unwrap(), 27);
}

#[tokio::test]
async fn test_reserve_is_all_or_nothing() {
    let h = harness(RecordingPublisher::default(), 9, 1).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;
    h.gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(3, 1)], None)
        .await
        .unwrap();

    let result = h
        .gateway
        .reserve(buyer, UserId::new(2), h.draw_id, &[item(2, 1), item(3, 1)], None)
        .await;

    match result {
        Err(GatewayError::Inventory(e)) => {
            assert_eq!(e.to_string(), "Number 3 is not available in any series")
        }
        other => panic!("unexpected result {other:?}"),
    }
    let two = h.inventory.find_cell(h.draw_id, 2, 1).await.unwrap();
    assert_eq!(two.status, CellStatus::Available);
    assert_eq!(h.publisher.events().len(), 1);
}

#[tokio::test]
async fn test_insufficient_stock_message() {
    let h = harness(RecordingPublisher::default(), 9, 2).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;

    let result = h
        .gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(5, 3)], None)
        .await;

    match result {
        Err(e) => assert_eq!(
            e.to_string(),
            "Insufficient stock. Requested 3 series of number 5, but only 2 available"
        ),
        Ok(_) => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_add_to_existing_holds_cells_under_fresh_reservation() {
    let h = harness(RecordingPublisher::default(), 9, 1).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;
    let existing = OrderId::new();
    h.inventory
        .reserve_single_by_value(h.draw_id, 1, None, existing)
        .await
        .unwrap();

    let reservation = h
        .gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(8, 1)], Some(existing))
        .await
        .unwrap();

    assert_eq!(reservation.confirmation.order_id, existing);
    let held_under = reservation.confirmation.fallback_order_id.unwrap();
    assert_ne!(held_under, existing);
    assert_eq!(reservation.cells[0].reserving_order_id, Some(held_under));
    match &h.publisher.events()[0] {
        IntegrationEvent::NumbersReserved(data) => {
            assert!(data.is_add_to_existing);
            assert_eq!(data.existing_order_id, Some(existing));
            assert_eq!(data.order_id, held_under);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Releasing the existing order leaves the new cell alone.
    let released = h.inventory.release_by_order(existing).await.unwrap();
    assert_eq!(released.len(), 1);
    let eight = h.inventory.find_cell(h.draw_id, 8, 1).await.unwrap();
    assert_eq!(eight.status, CellStatus::Reserved);
    assert_eq!(eight.reserving_order_id, Some(held_under));
}

#[tokio::test]
async fn test_publish_failure_releases_add_to_existing_reservation() {
    let h = harness(RecordingPublisher::failing(), 9, 1).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;
    let existing = OrderId::new();
    h.inventory
        .reserve_single_by_value(h.draw_id, 1, None, existing)
        .await
        .unwrap();

    let result = h
        .gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(8, 1)], Some(existing))
        .await;

    assert!(matches!(result, Err(GatewayError::Bus(_))));
    let eight = h.inventory.find_cell(h.draw_id, 8, 1).await.unwrap();
    assert_eq!(eight.status, CellStatus::Available);
    let one = h.inventory.find_cell(h.draw_id, 1, 1).await.unwrap();
    assert_eq!(one.reserving_order_id, Some(existing));
}

#[tokio::test]
async fn test_publish_failure_releases_fresh_reservation() {
    let h = harness(RecordingPublisher::failing(), 9, 1).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;

    let result = h
        .gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(1, 1)], None)
        .await;

    assert!(matches!(result, Err(GatewayError::Bus(_))));
    assert_eq!(h.inventory.available_count(h.draw_id).await.unwrap(), 10);
}

#[tokio::test]
async fn test_frame_errors_are_pushed_to_caller() {
    let h = harness(RecordingPublisher::default(), 9, 1).await;
    let (buyer, mut rx) = h.gateway.rooms().connect().await;

    h.gateway
        .handle_frame(
            buyer,
            ClientFrame::Reserve {
                draw_id: h.draw_id,
                user_id: UserId::new(1),
                items: vec![item(1, 0)],
                existing_order_id: None,
            },
        )
        .await;
    h.gateway
        .handle_frame(
            buyer,
            ClientFrame::Join {
                draw_id: DrawId::new(),
            },
        )
        .await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 2);
    assert!(matches!(&messages[0], PushMessage::Error { message } if message.contains("Quantity for number 1")));
    assert!(matches!(&messages[1], PushMessage::Error { message } if message.starts_with("Draw not found")));
}

#[tokio::test]
async fn test_number_outside_draw_is_rejected() {
    let h = harness(RecordingPublisher::default(), 9, 1).await;
    let (buyer, _rx) = h.gateway.rooms().connect().await;

    let result = h
        .gateway
        .reserve(buyer, UserId::new(1), h.draw_id, &[item(42, 1)], None)
        .await;

    assert!(matches!(
        result,
        Err(GatewayError::NumberOutOfRange { number: 42, .. })
    ));
}
