//! Cart service driven by the payment-completed consumer.

use std::sync::Arc;
use std::time::Duration;

use cart::{CartEventHandler, CartItem, CartService, InMemoryCartStore};
use chrono::Utc;
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use event_bus::{
    Consumer, ConsumerConfig, InMemoryEventBus, PaymentCompleted, Producer,
};

fn payment_completed(payment_id: &str, user: &str) -> PaymentCompleted {
    PaymentCompleted {
        payment_id: PaymentId::new(payment_id),
        order_id: OrderId::new("order_1"),
        user_id: UserId::new(user),
        amount: Money::from_cents(5000),
        currency: "USD".to_string(),
        payment_method: "card".to_string(),
        completed_at: Utc::now(),
    }
}

#[tokio::test]
async fn basket_scenario_add_accumulate_remove() {
    let service = CartService::new(InMemoryCartStore::new());
    let user = UserId::new("u1");

    assert!(service.get_basket(&user).await.unwrap().is_empty());

    let cart = service
        .add_item(&user, CartItem::priced("p1", "Lamp", Money::from_dollars(10), 2))
        .await
        .unwrap();
    assert_eq!(cart.total_amount, Money::from_dollars(20));

    let cart = service
        .add_item(&user, CartItem::priced("p1", "Lamp", Money::from_dollars(10), 3))
        .await
        .unwrap();
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(cart.total_amount, Money::from_dollars(50));

    let cart = service
        .remove_item(&user, &ProductId::new("p1"))
        .await
        .unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.total_amount, Money::zero());
}

#[tokio::test]
async fn published_payment_clears_basket_through_consumer() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryCartStore::new();
    let service = Arc::new(CartService::new(store.clone()));
    let user = UserId::new("u1");
    service
        .add_product(&user, ProductId::new("p1"), 3)
        .await
        .unwrap();

    Producer::new(bus.clone())
        .publish(&payment_completed("pay_1", "u1"))
        .await
        .unwrap();

    let consumer = Consumer::new(
        bus.clone(),
        CartEventHandler::new(service.clone()),
        ConsumerConfig::new("cart-service"),
    );
    let member = consumer.join().await.unwrap();
    let summary = consumer.poll(&member).await.unwrap();
    assert_eq!(summary.committed, 1);

    let cart = service.get_basket(&user).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.total_amount, Money::zero());
}

#[tokio::test]
async fn unavailable_store_delays_clear_until_it_recovers() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryCartStore::new();
    let service = Arc::new(CartService::new(store.clone()));
    let user = UserId::new("u1");
    service
        .add_product(&user, ProductId::new("p1"), 1)
        .await
        .unwrap();

    Producer::new(bus.clone())
        .publish(&payment_completed("pay_1", "u1"))
        .await
        .unwrap();

    let consumer = Consumer::new(
        bus.clone(),
        CartEventHandler::new(service.clone()),
        ConsumerConfig::new("cart-service"),
    );
    let member = consumer.join().await.unwrap();

    store.set_unavailable(true);
    let summary = consumer.poll(&member).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.committed, 0);

    store.set_unavailable(false);
    let summary = consumer.poll(&member).await.unwrap();
    assert_eq!(summary.committed, 1);
    assert!(service.get_basket(&user).await.unwrap().is_empty());
}

#[tokio::test]
async fn running_consumer_clears_basket_and_stops_on_shutdown() {
    let bus = InMemoryEventBus::new();
    let service = Arc::new(CartService::new(InMemoryCartStore::new()));
    let user = UserId::new("u1");
    service
        .add_product(&user, ProductId::new("p1"), 1)
        .await
        .unwrap();

    let mut config = ConsumerConfig::new("cart-service");
    config.poll_interval = Duration::from_millis(20);
    let consumer = Arc::new(Consumer::new(
        bus.clone(),
        CartEventHandler::new(service.clone()),
        config,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run(shutdown_rx).await }
    });

    Producer::new(bus.clone())
        .publish(&payment_completed("pay_1", "u1"))
        .await
        .unwrap();

    let mut cleared = false;
    for _ in 0..100 {
        if service.get_basket(&user).await.unwrap().is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared, "cart was not cleared by the running consumer");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}
