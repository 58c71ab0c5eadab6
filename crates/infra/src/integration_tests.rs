//! Integration tests for the stock ledger pipeline.
//!
//! Tests: post_event → lock → insert → replay → cost write-back → snapshot
//!
//! Verifies:
//! - Costs are recomputed for the whole item history on every write
//! - Retroactive events settle earlier provisional costs
//! - The append fast path matches a full replay
//! - Rebuilds are idempotent, and failed units leave nothing behind

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use stockbook_core::{DomainError, ItemId};
    use stockbook_ledger::{InventorySnapshot, Item, LedgerEvent, NewLedgerEvent, OperationKind};

    use crate::config::LedgerConfig;
    use crate::service::{CostingPolicy, LedgerError, StockLedger};
    use crate::store::{InMemoryLedgerStore, ItemLedgerTx, LedgerStore, LedgerStoreError};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn test_item() -> Item {
        Item::owned(ItemId::new(), "Notebook")
    }

    fn setup(items: &[Item], config: LedgerConfig) -> StockLedger<InMemoryLedgerStore> {
        let store = InMemoryLedgerStore::new();
        for item in items {
            store.register_item(item.clone()).unwrap();
        }
        StockLedger::new(store, config)
    }

    async fn post(
        ledger: &StockLedger<InMemoryLedgerStore>,
        item: &Item,
        kind: OperationKind,
        date: u32,
        quantity: i64,
        unit_price: i64,
    ) -> LedgerEvent {
        ledger
            .post_event(NewLedgerEvent::new(item.id, kind, day(date), quantity, unit_price))
            .await
            .unwrap()
    }

    async fn stored(ledger: &StockLedger<InMemoryLedgerStore>, item: &Item) -> Vec<LedgerEvent> {
        ledger.store().events(item.id).await.unwrap()
    }

    async fn snapshot(ledger: &StockLedger<InMemoryLedgerStore>, item: &Item) -> InventorySnapshot {
        ledger.store().snapshot(item.id).await.unwrap()
    }

    #[tokio::test]
    async fn fifo_costs_oldest_lots_first() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        post(&ledger, &item, OperationKind::Buy, 1, 5, 10).await;
        post(&ledger, &item, OperationKind::Buy, 2, 5, 20).await;
        let sale = post(&ledger, &item, OperationKind::Sell, 3, 7, 40).await;

        // 5 @ 10 plus 2 @ 20.
        assert_eq!(sale.cogs, Some(90));
        assert!(!sale.is_cogs_provisional);
        assert_eq!(sale.gross_profit(), Some(280 - 90));
        let snap = snapshot(&ledger, &item).await;
        assert_eq!(snap.quantity_on_hand, 3);
        assert_eq!(snap.last_acquisition_cost, Some(20));
    }

    #[tokio::test]
    async fn sale_before_purchase_is_settled_by_later_buy() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let sale = post(&ledger, &item, OperationKind::Sell, 1, 5, 12).await;
        assert_eq!(sale.cogs, Some(60));
        assert!(sale.is_cogs_provisional);

        post(&ledger, &item, OperationKind::Buy, 2, 5, 9).await;

        let events = stored(&ledger, &item).await;
        assert_eq!(events[0].id, sale.id);
        assert_eq!(events[0].cogs, Some(45));
        assert!(!events[0].is_cogs_provisional);
        assert_eq!(snapshot(&ledger, &item).await.quantity_on_hand, 0);
    }

    #[tokio::test]
    async fn backdated_sale_costs_the_same_as_in_order_entry() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        post(&ledger, &item, OperationKind::Buy, 2, 5, 9).await;
        let sale = post(&ledger, &item, OperationKind::Sell, 1, 5, 12).await;

        assert_eq!(sale.cogs, Some(45));
        assert!(!sale.is_cogs_provisional);
    }

    #[tokio::test]
    async fn partial_cover_leaves_sale_provisional() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let sale = post(&ledger, &item, OperationKind::Sell, 1, 10, 12).await;
        post(&ledger, &item, OperationKind::Buy, 2, 4, 9).await;

        let events = stored(&ledger, &item).await;
        let sale = events.iter().find(|e| e.id == sale.id).unwrap();
        assert_eq!(sale.cogs, Some(4 * 9 + 6 * 12));
        assert!(sale.is_cogs_provisional);
        assert_eq!(snapshot(&ledger, &item).await.quantity_on_hand, -6);
    }

    #[tokio::test]
    async fn consignment_sales_cost_price_minus_commission() {
        let item = Item::consignment(ItemId::new(), "Handbag")
            .with_commission_percent(Decimal::from(10));
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let sale = post(&ledger, &item, OperationKind::Sell, 1, 3, 100).await;
        assert_eq!(sale.cogs, Some(270));
        assert!(!sale.is_cogs_provisional);

        post(&ledger, &item, OperationKind::Buy, 2, 10, 50).await;
        let gift = post(&ledger, &item, OperationKind::Sell, 3, 3, 0).await;
        assert_eq!(gift.cogs, Some(150));

        let snap = snapshot(&ledger, &item).await;
        assert_eq!(snap.quantity_on_hand, 4);
        assert_eq!(snap.last_acquisition_cost, Some(50));
    }

    #[tokio::test]
    async fn receipts_and_payments_do_not_touch_stock() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        post(&ledger, &item, OperationKind::Buy, 1, 4, 10).await;
        let receipt = post(&ledger, &item, OperationKind::Receipt, 2, 3, 10).await;
        let payment = post(&ledger, &item, OperationKind::Payment, 3, 0, 0).await;

        assert_eq!(receipt.cogs, None);
        assert_eq!(payment.cogs, None);
        assert_eq!(snapshot(&ledger, &item).await.quantity_on_hand, 4);
    }

    #[tokio::test]
    async fn fast_path_matches_full_replay() {
        let item = test_item();
        let fast = setup(&[item.clone()], LedgerConfig::default());
        let full = setup(&[item.clone()], LedgerConfig::default().with_fast_path(false));

        let script = [
            (OperationKind::Buy, 1, 5, 10),
            (OperationKind::Sell, 2, 3, 25),
            (OperationKind::Buy, 2, 4, 12),
            (OperationKind::Payment, 3, 0, 0),
            (OperationKind::Sell, 4, 9, 25),
            (OperationKind::Buy, 5, 2, 11),
            (OperationKind::Buy, 6, 3, 13),
            (OperationKind::Sell, 1, 1, 25),
            (OperationKind::Buy, 7, 6, 14),
        ];
        for (kind, date, quantity, price) in script {
            post(&fast, &item, kind, date, quantity, price).await;
            post(&full, &item, kind, date, quantity, price).await;
        }

        let costs = |events: Vec<LedgerEvent>| {
            events
                .into_iter()
                .map(|e| (e.event_date, e.kind, e.cogs, e.is_cogs_provisional))
                .collect::<Vec<_>>()
        };
        assert_eq!(costs(stored(&fast, &item).await), costs(stored(&full, &item).await));
        assert_eq!(snapshot(&fast, &item).await, snapshot(&full, &item).await);
    }

    #[tokio::test]
    async fn consignment_fast_path_matches_full_replay() {
        let item = Item::consignment(ItemId::new(), "Kilim")
            .with_commission_percent(Decimal::from(15));
        let fast = setup(&[item.clone()], LedgerConfig::default());
        let full = setup(&[item.clone()], LedgerConfig::default().with_fast_path(false));

        let script = [
            (OperationKind::Sell, 1, 2, 200),
            (OperationKind::Buy, 2, 5, 80),
            (OperationKind::Receipt, 3, 0, 0),
            (OperationKind::Other, 3, 4, 9),
            (OperationKind::Sell, 4, 1, 0),
            (OperationKind::Buy, 5, 3, 90),
            (OperationKind::Payment, 6, 0, 0),
            (OperationKind::Use, 6, 2, 0),
            (OperationKind::Buy, 7, 1, 95),
        ];
        for (kind, date, quantity, price) in script {
            post(&fast, &item, kind, date, quantity, price).await;
            post(&full, &item, kind, date, quantity, price).await;
        }

        let costs = |events: Vec<LedgerEvent>| {
            events
                .into_iter()
                .map(|e| (e.event_date, e.kind, e.cogs, e.is_cogs_provisional))
                .collect::<Vec<_>>()
        };
        assert_eq!(costs(stored(&fast, &item).await), costs(stored(&full, &item).await));
        let snap = snapshot(&fast, &item).await;
        assert_eq!(snap, snapshot(&full, &item).await);
        assert_eq!(snap.quantity_on_hand, -2 + 5 - 1 + 3 - 2 + 1);
        assert_eq!(snap.last_acquisition_cost, Some(95));
    }

    #[tokio::test]
    async fn commission_change_during_a_write_is_not_lost() {
        let item = Item::consignment(ItemId::new(), "Teapot")
            .with_commission_percent(Decimal::from(10));
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let tx = ledger
            .store()
            .lock_item(item.id, Duration::from_secs(1))
            .await
            .unwrap();
        ledger
            .store()
            .register_item(item.clone().with_commission_amount(7))
            .unwrap();
        tx.commit().await.unwrap();

        let sale = post(&ledger, &item, OperationKind::Sell, 1, 1, 100).await;
        assert_eq!(sale.cogs, Some(93));
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let owned = test_item();
        let consigned =
            Item::consignment(ItemId::new(), "Scarf").with_commission_amount(5);
        let ledger = setup(&[owned.clone(), consigned.clone()], LedgerConfig::default());

        post(&ledger, &owned, OperationKind::Sell, 1, 4, 30).await;
        post(&ledger, &owned, OperationKind::Buy, 2, 3, 10).await;
        post(&ledger, &owned, OperationKind::Buy, 3, 5, 12).await;
        post(&ledger, &owned, OperationKind::Use, 4, 2, 0).await;
        post(&ledger, &consigned, OperationKind::Buy, 1, 3, 20).await;
        post(&ledger, &consigned, OperationKind::Sell, 2, 2, 40).await;

        let before = stored(&ledger, &owned).await;
        let first = ledger.rebuild_all(CostingPolicy::Fifo).await.unwrap();
        assert_eq!(first.items_rebuilt, 2);
        assert_eq!(first.events_updated, 0);
        let after_first = stored(&ledger, &owned).await;
        let snap_first = snapshot(&ledger, &owned).await;

        let second = ledger.rebuild_all(CostingPolicy::Fifo).await.unwrap();
        assert_eq!(second.events_updated, 0);
        assert_eq!(before, after_first);
        assert_eq!(after_first, stored(&ledger, &owned).await);
        assert_eq!(snap_first, snapshot(&ledger, &owned).await);
    }

    #[tokio::test]
    async fn legacy_rebuild_diverges_only_after_negative_stock() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        post(&ledger, &item, OperationKind::Sell, 1, 2, 30).await;
        post(&ledger, &item, OperationKind::Buy, 2, 2, 10).await;
        let fifo = stored(&ledger, &item).await;
        assert_eq!(fifo[0].cogs, Some(20));

        let report = ledger.rebuild_all(CostingPolicy::MovingAverageOrLpp).await.unwrap();
        assert_eq!(report.events_updated, 1);
        let legacy = stored(&ledger, &item).await;
        // No purchase was known at the time of the sale.
        assert_eq!(legacy[0].cogs, Some(0));
        assert_eq!(snapshot(&ledger, &item).await.average_cost, Some(0));

        ledger.rebuild_all(CostingPolicy::Fifo).await.unwrap();
        assert_eq!(stored(&ledger, &item).await, fifo);
        assert_eq!(snapshot(&ledger, &item).await.average_cost, None);
    }

    #[tokio::test]
    async fn deleting_a_purchase_reopens_the_shortfall() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let sale = post(&ledger, &item, OperationKind::Sell, 1, 2, 30).await;
        let buy = post(&ledger, &item, OperationKind::Buy, 2, 2, 10).await;

        let summary = ledger.delete_event(item.id, buy.id).await.unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(summary.provisional, 1);
        assert_eq!(summary.snapshot.quantity_on_hand, -2);

        let events = stored(&ledger, &item).await;
        assert_eq!(events[0].id, sale.id);
        assert_eq!(events[0].cogs, Some(60));
        assert!(events[0].is_cogs_provisional);

        let err = ledger.delete_event(item.id, buy.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(LedgerStoreError::EventNotFound(id)) if id == buy.id));
    }

    #[tokio::test]
    async fn replay_item_repairs_stale_costs() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());
        post(&ledger, &item, OperationKind::Buy, 1, 2, 10).await;
        post(&ledger, &item, OperationKind::Sell, 2, 1, 30).await;

        let summary = ledger.replay_item(item.id).await.unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.snapshot.quantity_on_hand, 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_storage() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        let err = ledger
            .post_event(NewLedgerEvent::new(item.id, OperationKind::Sell, day(1), -2, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
        assert!(!err.is_retryable());
        assert!(stored(&ledger, &item).await.is_empty());
    }

    #[tokio::test]
    async fn locked_item_yields_retryable_error_and_no_partial_write() {
        let item = test_item();
        let config = LedgerConfig {
            lock_timeout: Duration::from_millis(20),
            ..LedgerConfig::default()
        };
        let ledger = setup(&[item.clone()], config);

        let held = ledger
            .store()
            .lock_item(item.id, Duration::from_secs(1))
            .await
            .unwrap();
        let err = ledger
            .post_event(NewLedgerEvent::new(item.id, OperationKind::Buy, day(1), 1, 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        drop(held);

        assert!(stored(&ledger, &item).await.is_empty());
        post(&ledger, &item, OperationKind::Buy, 1, 1, 10).await;
        assert_eq!(snapshot(&ledger, &item).await.quantity_on_hand, 1);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let ledger = setup(&[], LedgerConfig::default());
        let err = ledger
            .post_event(NewLedgerEvent::new(ItemId::new(), OperationKind::Buy, day(1), 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(LedgerStoreError::ItemNotFound(_))));
    }

    #[tokio::test]
    async fn quantity_is_conserved_across_writes() {
        let item = test_item();
        let ledger = setup(&[item.clone()], LedgerConfig::default());

        post(&ledger, &item, OperationKind::Buy, 3, 10, 5).await;
        post(&ledger, &item, OperationKind::Sell, 4, 4, 9).await;
        post(&ledger, &item, OperationKind::Use, 1, 1, 0).await;
        post(&ledger, &item, OperationKind::Buy, 2, 2, 6).await;
        post(&ledger, &item, OperationKind::Sell, 5, 3, 9).await;

        assert_eq!(snapshot(&ledger, &item).await.quantity_on_hand, 10 + 2 - 4 - 1 - 3);
    }
}
