//! Integration tests for the engine over the in-memory store.
//!
//! Tests: operation → row locks → domain decision → commit → notification
//!
//! Verifies:
//! - FIFO previews never mutate; commits re-check under lock
//! - Transfers, shipments and deliveries apply all lines or none
//! - Concurrent operations never over-claim a lot
//! - Notifications are published only for committed operations

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use lotflow_core::{ActorId, DomainError, ProductId, RouteId, WarehouseId};
    use lotflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use lotflow_inventory::{
        Lot, LotId, MovementId, MovementKind, MovementPhase, NewLot, Product, Route, Warehouse,
    };
    use lotflow_sales::{NewOrderLine, SalesOrderId, SalesOrderStatus};
    use lotflow_shipping::{DemandLine, OrderDemand, ShipmentPhase};
    use lotflow_transfers::{TransferLine, TransferState};

    use crate::bootstrap::ensure_system_warehouses;
    use crate::config::EngineConfig;
    use crate::engine::{
        AssembleShipmentInput, DeliveredLine, IncidentLineInput, InventoryEngine, ReceiveStock,
        TransferRequestInput,
    };
    use crate::store::{InMemoryStore, InventoryStore};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Engine = InventoryEngine<InMemoryStore, Bus>;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    struct Fixture {
        engine: Engine,
        bus: Bus,
        config: EngineConfig,
        actor: ActorId,
    }

    fn setup() -> Fixture {
        let config = EngineConfig::new(WarehouseId::new(), WarehouseId::new(), WarehouseId::new());
        let store = InMemoryStore::from_config(&config);
        ensure_system_warehouses(&store, &config).unwrap();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        Fixture {
            engine: InventoryEngine::new(store, bus.clone(), config),
            bus,
            config,
            actor: ActorId::new(),
        }
    }

    impl Fixture {
        fn warehouse(&self, name: &str) -> WarehouseId {
            self.engine
                .register_warehouse(Warehouse {
                    id: WarehouseId::new(),
                    name: name.to_string(),
                    is_distribution_center: false,
                })
                .unwrap()
                .id
        }

        fn product(&self, name: &str) -> ProductId {
            self.engine
                .register_product(Product {
                    id: ProductId::new(),
                    name: name.to_string(),
                    default_unit: "kg".to_string(),
                    expiry_hours: None,
                })
                .unwrap()
                .id
        }

        fn route(&self, open_tara: WarehouseId) -> RouteId {
            self.engine
                .register_route(Route {
                    id: RouteId::new(),
                    name: "Ruta norte".to_string(),
                    open_tara_warehouse: open_tara,
                })
                .unwrap()
                .id
        }

        fn lot(&self, product_id: ProductId, warehouse_id: WarehouseId, quantity: i64, age: i64) -> Lot {
            self.engine
                .create_lot(
                    NewLot {
                        product_id,
                        warehouse_id,
                        quantity,
                        unit_cost: 250,
                        received_at: day(age),
                        location: None,
                        source_ref: None,
                    },
                    self.actor,
                )
                .unwrap()
        }

        fn order(&self, lines: &[(ProductId, i64)]) -> SalesOrderId {
            let order_id = SalesOrderId::generate();
            self.engine
                .register_order(
                    order_id,
                    Some("cliente 42".to_string()),
                    lines
                        .iter()
                        .map(|(product_id, quantity)| NewOrderLine {
                            product_id: *product_id,
                            quantity: *quantity,
                            unit_price: 900,
                        })
                        .collect(),
                    self.actor,
                )
                .unwrap();
            order_id
        }

        fn qty(&self, lot_id: LotId) -> i64 {
            self.engine.lot(lot_id).unwrap().quantity()
        }

        fn snapshot(&self) -> Vec<Lot> {
            let mut lots = self.engine.store().lots().unwrap();
            lots.sort_by_key(|l| l.id_typed());
            lots
        }

        /// Units of `product_id` across every warehouse.
        fn total(&self, product_id: ProductId) -> i64 {
            self.engine
                .store()
                .lots()
                .unwrap()
                .iter()
                .filter(|l| l.product_id() == product_id && l.is_active())
                .map(|l| l.quantity())
                .sum()
        }

        fn request_transfer(
            &self,
            requester: WarehouseId,
            supplier: WarehouseId,
            lines: &[(ProductId, i64)],
        ) -> lotflow_transfers::TransferId {
            self.engine
                .request_transfer(
                    TransferRequestInput {
                        requester,
                        supplier,
                        lines: lines
                            .iter()
                            .map(|(product_id, quantity)| TransferLine {
                                product_id: *product_id,
                                quantity: *quantity,
                            })
                            .collect(),
                        note: Some("reposicion".to_string()),
                    },
                    self.actor,
                )
                .unwrap()
                .id_typed()
        }
    }

    // ---- FIFO allocator ------------------------------------------------------

    #[test]
    fn fifo_preview_takes_oldest_lots_first() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        let a = fx.lot(p, w, 10, 0);
        let b = fx.lot(p, w, 5, 1);

        let preview = fx.engine.allocate_fifo(p, w, 12).unwrap();

        assert!(preview.complete);
        assert_eq!(preview.covered, 12);
        assert_eq!(preview.shortfall, 0);
        let taken: Vec<_> = preview.lines.iter().map(|l| (l.lot_id, l.quantity)).collect();
        assert_eq!(taken, vec![(a.id_typed(), 10), (b.id_typed(), 2)]);
        assert_eq!(fx.qty(a.id_typed()), 10);
        assert_eq!(fx.qty(b.id_typed()), 5);
    }

    #[test]
    fn short_preview_reports_shortfall_without_mutation() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        fx.lot(p, w, 10, 0);
        fx.lot(p, w, 5, 1);
        let before = fx.snapshot();

        let preview = fx.engine.allocate_fifo(p, w, 20).unwrap();

        assert!(!preview.complete);
        assert_eq!(preview.covered, 15);
        assert_eq!(preview.shortfall, 5);
        assert_eq!(fx.snapshot(), before);
    }

    #[test]
    fn commit_allocation_decrements_lots_and_records_one_out_movement() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        let a = fx.lot(p, w, 10, 0);
        let b = fx.lot(p, w, 5, 1);

        let preview = fx.engine.allocate_fifo(p, w, 12).unwrap();
        let lines = fx
            .engine
            .commit_allocation(&preview, MovementKind::Sale, fx.actor, None)
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(fx.qty(a.id_typed()), 0);
        assert_eq!(fx.qty(b.id_typed()), 3);
        let movement = fx.engine.movement(lines[0].movement_id).unwrap();
        assert_eq!(movement.kind(), MovementKind::Sale);
        assert_eq!(movement.phase(), MovementPhase::Terminated);
        let totals = movement.totals().unwrap();
        assert_eq!(totals.quantity, 12);
        assert_eq!(totals.cost, 12 * 250);
    }

    #[test]
    fn commit_allocation_rejects_incomplete_preview() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        let a = fx.lot(p, w, 4, 0);

        let preview = fx.engine.allocate_fifo(p, w, 6).unwrap();
        let err = fx
            .engine
            .commit_allocation(&preview, MovementKind::Sale, fx.actor, None)
            .unwrap_err();

        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(fx.qty(a.id_typed()), 4);
    }

    #[test]
    fn commit_allocation_conflicts_when_a_lot_changed_after_preview() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        let a = fx.lot(p, w, 10, 0);
        let b = fx.lot(p, w, 5, 1);

        let preview = fx.engine.allocate_fifo(p, w, 12).unwrap();
        fx.engine
            .adjust_lot_quantity(a.id_typed(), -5, fx.actor, Some("merma".to_string()))
            .unwrap();

        let err = fx
            .engine
            .commit_allocation(&preview, MovementKind::Sale, fx.actor, None)
            .unwrap_err();

        assert_eq!(err.kind(), "concurrency_conflict");
        assert_eq!(fx.qty(a.id_typed()), 5);
        assert_eq!(fx.qty(b.id_typed()), 5);
    }

    #[test]
    fn concurrent_commits_never_over_claim_a_lot() {
        let fx = setup();
        let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
        let lot = fx.lot(p, w, 10, 0);

        let first = fx.engine.allocate_fifo(p, w, 7).unwrap();
        let second = fx.engine.allocate_fifo(p, w, 7).unwrap();

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|preview| {
                    let engine = &fx.engine;
                    let actor = fx.actor;
                    s.spawn(move || engine.commit_allocation(&preview, MovementKind::Sale, actor, None))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        let failed = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(failed.kind(), "concurrency_conflict");
        assert_eq!(fx.qty(lot.id_typed()), 3);
    }

    // ---- lot store -----------------------------------------------------------

    #[test]
    fn split_relocate_and_retire_keep_lineage() {
        let fx = setup();
        let (p, w1, w2) = (fx.product("azucar"), fx.warehouse("a"), fx.warehouse("b"));
        let lot = fx.lot(p, w1, 10, 3);

        let outcome = fx.engine.split_lot(lot.id_typed(), 4, fx.actor).unwrap();
        assert_eq!(outcome.original.quantity(), 6);
        assert_eq!(outcome.split.quantity(), 4);
        assert_eq!(outcome.split.parent_lot_id(), Some(lot.id_typed()));
        assert_eq!(outcome.split.received_at(), day(3));

        let moved = fx
            .engine
            .relocate_lot(outcome.split.id_typed(), w2, fx.actor, None)
            .unwrap();
        assert_eq!(moved.warehouse_id(), w2);
        assert_eq!(fx.engine.stock_on_hand(p, w1).unwrap(), 6);
        assert_eq!(fx.engine.stock_on_hand(p, w2).unwrap(), 4);

        let err = fx.engine.retire_lot(lot.id_typed(), fx.actor).unwrap_err();
        assert_eq!(err.kind(), "validation");
        fx.engine
            .adjust_lot_quantity(lot.id_typed(), -6, fx.actor, None)
            .unwrap();
        fx.engine.retire_lot(lot.id_typed(), fx.actor).unwrap();
        assert!(fx.engine.lots_for(p, w1).unwrap().is_empty());
    }

    #[test]
    fn adjustment_below_zero_is_rejected() {
        let fx = setup();
        let (p, w) = (fx.product("azucar"), fx.warehouse("a"));
        let lot = fx.lot(p, w, 3, 0);

        let err = fx
            .engine
            .adjust_lot_quantity(lot.id_typed(), -4, fx.actor, None)
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_quantity");
        assert_eq!(fx.qty(lot.id_typed()), 3);
    }

    #[test]
    fn create_lot_requires_known_product_and_warehouse() {
        let fx = setup();
        let w = fx.warehouse("a");

        let err = fx
            .engine
            .create_lot(
                NewLot {
                    product_id: ProductId::new(),
                    warehouse_id: w,
                    quantity: 1,
                    unit_cost: 1,
                    received_at: day(0),
                    location: None,
                    source_ref: None,
                },
                fx.actor,
            )
            .unwrap_err();

        assert_eq!(err.kind(), "not_found");
    }

    // ---- movement ledger -----------------------------------------------------

    #[test]
    fn manual_movement_snapshots_cost_and_freezes_on_terminate() {
        let fx = setup();
        let (p, w) = (fx.product("harina"), fx.warehouse("a"));
        let lot = fx.lot(p, w, 10, 0);

        let movement = fx
            .engine
            .create_movement(
                lotflow_inventory::NewMovement {
                    kind: MovementKind::Transformation,
                    source_warehouse: w,
                    destination_warehouse: None,
                    reference: None,
                    note: Some("pan".to_string()),
                },
                fx.actor,
            )
            .unwrap();
        let id = movement.id_typed();
        fx.engine.add_movement_line(id, p, lot.id_typed(), 3).unwrap();
        fx.engine.add_movement_line(id, p, lot.id_typed(), 2).unwrap();

        assert_eq!(fx.qty(lot.id_typed()), 5);

        let terminated = fx.engine.terminate_movement(id).unwrap();
        assert_eq!(terminated.totals().unwrap().quantity, 5);
        assert_eq!(fx.engine.movement_lines(id).unwrap().len(), 2);

        let err = fx.engine.add_movement_line(id, p, lot.id_typed(), 1).unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
        assert_eq!(fx.qty(lot.id_typed()), 5);
    }

    fn open_movement(fx: &Fixture, kind: MovementKind, source: WarehouseId) -> MovementId {
        fx.engine
            .create_movement(
                lotflow_inventory::NewMovement {
                    kind,
                    source_warehouse: source,
                    destination_warehouse: None,
                    reference: None,
                    note: None,
                },
                fx.actor,
            )
            .unwrap()
            .id_typed()
    }

    #[test]
    fn manual_sale_line_consumes_stock_and_its_reversal_restores_it() {
        let fx = setup();
        let (p, w) = (fx.product("harina"), fx.warehouse("a"));
        let lot = fx.lot(p, w, 10, 0);

        let sale = open_movement(&fx, MovementKind::Sale, w);
        fx.engine.add_movement_line(sale, p, lot.id_typed(), 5).unwrap();
        assert_eq!(fx.qty(lot.id_typed()), 5);

        let err = fx.engine.add_movement_line(sale, p, lot.id_typed(), 6).unwrap_err();
        assert_eq!(err.kind(), "invalid_quantity");
        assert_eq!(fx.qty(lot.id_typed()), 5);
        assert_eq!(fx.engine.movement_lines(sale).unwrap().len(), 1);

        fx.engine.terminate_movement(sale).unwrap();
        fx.engine.reverse_movement(sale, fx.actor, None).unwrap();
        assert_eq!(fx.qty(lot.id_typed()), 10);
        assert_eq!(fx.total(p), 10);
    }

    #[test]
    fn manual_receiving_line_credits_the_lot() {
        let fx = setup();
        let (p, w) = (fx.product("harina"), fx.warehouse("a"));
        let lot = fx.lot(p, w, 4, 0);

        let receipt = open_movement(&fx, MovementKind::Receiving, w);
        fx.engine.add_movement_line(receipt, p, lot.id_typed(), 6).unwrap();
        fx.engine.terminate_movement(receipt).unwrap();
        assert_eq!(fx.qty(lot.id_typed()), 10);

        fx.engine.reverse_movement(receipt, fx.actor, None).unwrap();
        assert_eq!(fx.qty(lot.id_typed()), 4);
    }

    #[test]
    fn movement_line_must_name_a_lot_in_the_source_warehouse() {
        let fx = setup();
        let p = fx.product("harina");
        let (w1, w2) = (fx.warehouse("a"), fx.warehouse("b"));
        let elsewhere = fx.lot(p, w2, 10, 0);

        let sale = open_movement(&fx, MovementKind::Sale, w1);
        let err = fx
            .engine
            .add_movement_line(sale, p, elsewhere.id_typed(), 3)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(fx.qty(elsewhere.id_typed()), 10);
        assert!(fx.engine.movement_lines(sale).unwrap().is_empty());

        let transfer = open_movement(&fx, MovementKind::TransferOut, w2);
        let err = fx
            .engine
            .add_movement_line(transfer, p, elsewhere.id_typed(), 3)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(fx.qty(elsewhere.id_typed()), 10);
    }

    #[test]
    fn reversing_a_sale_recredits_lots_exactly_once() {
        let fx = setup();
        let (p, w) = (fx.product("harina"), fx.warehouse("a"));
        let lot = fx.lot(p, w, 10, 0);
        let preview = fx.engine.allocate_fifo(p, w, 4).unwrap();
        let lines = fx
            .engine
            .commit_allocation(&preview, MovementKind::Sale, fx.actor, None)
            .unwrap();
        let sale_id = lines[0].movement_id;

        let reversal = fx
            .engine
            .reverse_movement(sale_id, fx.actor, Some("devolucion".to_string()))
            .unwrap();

        assert_eq!(reversal.kind(), MovementKind::CancellationReversal);
        assert_eq!(reversal.reverses(), Some(sale_id));
        assert_eq!(fx.qty(lot.id_typed()), 10);

        let err = fx.engine.reverse_movement(sale_id, fx.actor, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
        assert_eq!(fx.qty(lot.id_typed()), 10);
    }

    #[test]
    fn reversing_a_consumed_receipt_fails() {
        let fx = setup();
        let (p, w) = (fx.product("harina"), fx.warehouse("a"));
        let receipt = fx
            .engine
            .receive_stock(
                ReceiveStock {
                    product_id: p,
                    warehouse_id: w,
                    expected: 10,
                    received: 10,
                    unit_cost: 300,
                    source_ref: Some("remito 1".to_string()),
                    received_at: Some(day(0)),
                    location: None,
                },
                fx.actor,
            )
            .unwrap();
        assert!(receipt.incident.is_none());
        let preview = fx.engine.allocate_fifo(p, w, 8).unwrap();
        fx.engine
            .commit_allocation(&preview, MovementKind::Sale, fx.actor, None)
            .unwrap();

        let err = fx
            .engine
            .reverse_movement(receipt.movement.id_typed(), fx.actor, None)
            .unwrap_err();

        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(fx.qty(receipt.lot.id_typed()), 2);
    }

    // ---- transfer workflow ---------------------------------------------------

    #[test]
    fn approval_short_of_stock_leaves_request_pending() {
        let fx = setup();
        let p = fx.product("aceite");
        let (w1, w2) = (fx.warehouse("w1"), fx.warehouse("w2"));
        let lot = fx.lot(p, w1, 6, 0);
        let transfer_id = fx.request_transfer(w2, w1, &[(p, 8)]);

        let err = fx.engine.approve_transfer(transfer_id, fx.actor, None).unwrap_err();

        match err.domain() {
            Some(DomainError::InsufficientStock(shortfalls)) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].product_id, p);
                assert_eq!(shortfalls[0].missing(), 2);
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }
        assert_eq!(fx.engine.transfer(transfer_id).unwrap().state(), TransferState::Pending);
        assert_eq!(fx.qty(lot.id_typed()), 6);
        assert_eq!(fx.engine.stock_on_hand(p, w2).unwrap(), 0);
    }

    #[test]
    fn approval_relocates_whole_lots_and_splits_the_last() {
        let fx = setup();
        let p = fx.product("aceite");
        let (w1, w2) = (fx.warehouse("w1"), fx.warehouse("w2"));
        let old = fx.lot(p, w1, 5, 0);
        let newer = fx.lot(p, w1, 10, 1);
        let transfer_id = fx.request_transfer(w2, w1, &[(p, 8)]);

        let approved = fx.engine.approve_transfer(transfer_id, fx.actor, None).unwrap();

        assert_eq!(approved.state(), TransferState::Approved);
        assert_eq!(fx.engine.lot(old.id_typed()).unwrap().warehouse_id(), w2);
        assert_eq!(fx.qty(newer.id_typed()), 7);
        assert_eq!(fx.engine.stock_on_hand(p, w1).unwrap(), 7);
        assert_eq!(fx.engine.stock_on_hand(p, w2).unwrap(), 8);
        assert_eq!(fx.total(p), 15);

        let out = fx.engine.movement(approved.outbound_movement().unwrap()).unwrap();
        let inbound = fx.engine.movement(approved.inbound_movement().unwrap()).unwrap();
        assert_eq!(out.kind(), MovementKind::TransferOut);
        assert_eq!(inbound.kind(), MovementKind::TransferIn);
        assert_eq!(out.totals().unwrap().quantity, 8);
        assert_eq!(inbound.totals().unwrap().quantity, 8);

        let split = fx
            .engine
            .lots_for(p, w2)
            .unwrap()
            .into_iter()
            .find(|l| l.id_typed() != old.id_typed())
            .unwrap();
        assert_eq!(split.parent_lot_id(), Some(newer.id_typed()));
        assert_eq!(split.received_at(), day(1));

        let err = fx.engine.approve_transfer(transfer_id, fx.actor, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
        let err = fx.engine.reject_transfer(transfer_id, fx.actor, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
        assert_eq!(fx.engine.stock_on_hand(p, w2).unwrap(), 8);
    }

    #[test]
    fn rejection_escalates_to_the_central_warehouse() {
        let fx = setup();
        let p = fx.product("aceite");
        let (w1, w2) = (fx.warehouse("w1"), fx.warehouse("w2"));
        let transfer_id = fx.request_transfer(w2, w1, &[(p, 8)]);

        let rejected = fx
            .engine
            .reject_transfer(transfer_id, fx.actor, Some("sin stock".to_string()))
            .unwrap();

        assert_eq!(rejected.state(), TransferState::Rejected);
        let escalated_id = rejected.escalated_to().unwrap();
        let escalated = fx.engine.transfer(escalated_id).unwrap();
        assert_eq!(escalated.state(), TransferState::Pending);
        assert_eq!(escalated.requester(), w2);
        assert_eq!(escalated.supplier(), fx.config.central_warehouse);
        assert_eq!(escalated.lines(), rejected.lines());
        assert_eq!(escalated.escalated_from(), Some(transfer_id));
    }

    #[test]
    fn rejection_against_the_central_warehouse_does_not_escalate() {
        let fx = setup();
        let p = fx.product("aceite");
        let w2 = fx.warehouse("w2");
        let transfer_id = fx.request_transfer(w2, fx.config.central_warehouse, &[(p, 8)]);

        let rejected = fx.engine.reject_transfer(transfer_id, fx.actor, None).unwrap();

        assert_eq!(rejected.state(), TransferState::Rejected);
        assert_eq!(rejected.escalated_to(), None);
    }

    #[test]
    fn concurrent_approvals_against_the_same_lots_serialize() {
        let fx = setup();
        let p = fx.product("aceite");
        let (w1, w2, w3) = (fx.warehouse("w1"), fx.warehouse("w2"), fx.warehouse("w3"));
        fx.lot(p, w1, 10, 0);
        let first = fx.request_transfer(w2, w1, &[(p, 8)]);
        let second = fx.request_transfer(w3, w1, &[(p, 8)]);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|id| {
                    let engine = &fx.engine;
                    let actor = fx.actor;
                    s.spawn(move || engine.approve_transfer(id, actor, None))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let failed = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(failed.kind(), "insufficient_stock");
        assert_eq!(fx.engine.stock_on_hand(p, w1).unwrap(), 2);
        assert_eq!(
            fx.engine.stock_on_hand(p, w2).unwrap() + fx.engine.stock_on_hand(p, w3).unwrap(),
            8
        );
        assert_eq!(fx.total(p), 10);
    }

    // ---- shipment assembly and delivery --------------------------------------

    struct RouteSetup {
        id: RouteId,
        origin: WarehouseId,
        tara: WarehouseId,
    }

    fn route_line(fx: &Fixture) -> RouteSetup {
        let origin = fx.warehouse("centro de carga");
        let tara = fx.warehouse("tara abierta");
        RouteSetup {
            id: fx.route(tara),
            origin,
            tara,
        }
    }

    fn assemble(
        fx: &Fixture,
        route: &RouteSetup,
        orders: Vec<OrderDemand>,
        tara: Vec<DemandLine>,
    ) -> crate::EngineResult<lotflow_shipping::Shipment> {
        fx.engine.assemble_shipment(
            AssembleShipmentInput {
                route_id: route.id,
                origin_warehouse: route.origin,
                orders,
                tara,
            },
            fx.actor,
        )
    }

    fn demand(order_id: SalesOrderId, lines: &[(ProductId, i64)]) -> OrderDemand {
        OrderDemand {
            order_id,
            lines: lines
                .iter()
                .map(|(product_id, quantity)| DemandLine {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn loaded_order_is_delivered_in_full() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 12, 0);
        let order_id = fx.order(&[(p, 10)]);

        let shipment = assemble(&fx, &r, vec![demand(order_id, &[(p, 10)])], vec![]).unwrap();

        assert_eq!(shipment.phase(), ShipmentPhase::Loaded);
        assert!(shipment.lines()[0].complete);
        assert_eq!(shipment.lines()[0].unit_price, Some(900));
        assert!(shipment.tara_movements().is_none());
        let order = fx.engine.order(order_id).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Loaded);
        assert_eq!(order.lines()[0].loaded_quantity, 10);
        let buffer = fx.config.embark_buffer_warehouse;
        assert_eq!(fx.engine.stock_on_hand(p, buffer).unwrap(), 10);
        assert_eq!(fx.engine.stock_on_hand(p, r.origin).unwrap(), 2);

        let order = fx
            .engine
            .reconcile_delivery(
                order_id,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 10,
                }],
                fx.actor,
            )
            .unwrap();

        assert_eq!(order.status(), SalesOrderStatus::Delivered);
        assert!(order.lines()[0].delivered);
        assert_eq!(fx.engine.stock_on_hand(p, buffer).unwrap(), 0);
        assert_eq!(fx.engine.stock_on_hand(p, r.tara).unwrap(), 0);
        let closed = fx.engine.shipment(shipment.id_typed()).unwrap();
        assert_eq!(closed.phase(), ShipmentPhase::Closed);
    }

    #[test]
    fn partial_load_keeps_the_order_open() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 20, 0);
        let order_id = fx.order(&[(p, 10)]);

        let shipment = assemble(&fx, &r, vec![demand(order_id, &[(p, 6)])], vec![]).unwrap();

        let line = &shipment.lines()[0];
        assert!(!line.complete);
        assert_eq!((line.requested, line.loaded), (6, 6));
        let order = fx.engine.order(order_id).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Open);
        assert_eq!(order.lines()[0].loaded_quantity, 6);
    }

    #[test]
    fn tara_shares_a_lot_with_orders_without_double_counting() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        let lot = fx.lot(p, r.origin, 10, 0);
        let order_id = fx.order(&[(p, 6)]);

        let shipment = assemble(
            &fx,
            &r,
            vec![demand(order_id, &[(p, 6)])],
            vec![DemandLine {
                product_id: p,
                quantity: 4,
            }],
        )
        .unwrap();

        let order_line = shipment.lines().iter().find(|l| l.order_id.is_some()).unwrap();
        let tara_line = shipment.lines().iter().find(|l| l.order_id.is_none()).unwrap();
        assert_eq!(order_line.lots[0].source_lot, lot.id_typed());
        assert_ne!(order_line.lots[0].buffer_lot, lot.id_typed());
        assert_eq!(tara_line.lots[0].buffer_lot, lot.id_typed());
        assert!(shipment.order_movements().is_some());
        assert!(shipment.tara_movements().is_some());

        let buffer = fx.config.embark_buffer_warehouse;
        assert_eq!(fx.engine.stock_on_hand(p, buffer).unwrap(), 10);
        assert_eq!(fx.engine.stock_on_hand(p, r.origin).unwrap(), 0);
        assert_eq!(fx.total(p), 10);
    }

    #[test]
    fn shipment_short_on_any_line_mutates_nothing() {
        let fx = setup();
        let r = route_line(&fx);
        let (p, q) = (fx.product("yerba"), fx.product("fideos"));
        fx.lot(p, r.origin, 10, 0);
        fx.lot(q, r.origin, 3, 0);
        let first = fx.order(&[(p, 8)]);
        let second = fx.order(&[(q, 5)]);
        let before = fx.snapshot();

        let err = assemble(
            &fx,
            &r,
            vec![demand(first, &[(p, 8)]), demand(second, &[(q, 5)])],
            vec![DemandLine {
                product_id: p,
                quantity: 4,
            }],
        )
        .unwrap_err();

        let shortfalls = err.domain().unwrap().shortfalls().to_vec();
        assert_eq!(shortfalls.len(), 2);
        assert!(
            shortfalls
                .iter()
                .any(|s| s.product_id == q && s.order_id == Some(second.0) && s.missing() == 2)
        );
        assert!(
            shortfalls
                .iter()
                .any(|s| s.product_id == p && s.order_id.is_none() && s.covered == 2)
        );
        assert_eq!(fx.snapshot(), before);
        assert_eq!(fx.engine.order(first).unwrap().lines()[0].loaded_quantity, 0);
    }

    #[test]
    fn partial_delivery_returns_the_remainder_to_open_tara() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 10, 0);
        let order_id = fx.order(&[(p, 10)]);
        let shipment = assemble(&fx, &r, vec![demand(order_id, &[(p, 10)])], vec![]).unwrap();

        let order = fx
            .engine
            .reconcile_delivery(
                order_id,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 7,
                }],
                fx.actor,
            )
            .unwrap();

        assert_eq!(order.status(), SalesOrderStatus::PartiallyDelivered);
        assert_eq!(order.lines()[0].delivered_quantity, Some(7));
        assert!(!order.lines()[0].delivered);
        assert_eq!(fx.engine.stock_on_hand(p, r.tara).unwrap(), 3);
        assert_eq!(
            fx.engine.stock_on_hand(p, fx.config.embark_buffer_warehouse).unwrap(),
            0
        );
        assert_eq!(fx.total(p), 3);
        assert_eq!(
            fx.engine.shipment(shipment.id_typed()).unwrap().phase(),
            ShipmentPhase::Closed
        );

        let err = fx
            .engine
            .reconcile_delivery(
                order_id,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 3,
                }],
                fx.actor,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
    }

    #[test]
    fn reversing_a_delivery_sale_after_the_remainder_moved_is_rejected() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 10, 0);
        let order_id = fx.order(&[(p, 10)]);
        assemble(&fx, &r, vec![demand(order_id, &[(p, 10)])], vec![]).unwrap();
        fx.engine
            .reconcile_delivery(
                order_id,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 7,
                }],
                fx.actor,
            )
            .unwrap();
        let buffer = fx.config.embark_buffer_warehouse;
        let sale = fx
            .engine
            .store()
            .movements()
            .unwrap()
            .into_iter()
            .find(|m| m.kind() == MovementKind::Sale && m.source_warehouse() == buffer)
            .unwrap();
        let before = fx.snapshot();

        let err = fx
            .engine
            .reverse_movement(sale.id_typed(), fx.actor, None)
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(fx.snapshot(), before);
        assert_eq!(fx.engine.stock_on_hand(p, buffer).unwrap(), 0);
        assert_eq!(fx.engine.stock_on_hand(p, r.tara).unwrap(), 3);
        assert!(
            fx.engine
                .store()
                .movements()
                .unwrap()
                .iter()
                .all(|m| m.reverses() != Some(sale.id_typed()))
        );
    }

    #[test]
    fn delivering_more_than_ordered_mutates_nothing() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 12, 0);
        let order_id = fx.order(&[(p, 10)]);
        assemble(&fx, &r, vec![demand(order_id, &[(p, 10)])], vec![]).unwrap();
        let before = fx.snapshot();

        let err = fx
            .engine
            .reconcile_delivery(
                order_id,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 11,
                }],
                fx.actor,
            )
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(fx.snapshot(), before);
        assert_eq!(fx.engine.order(order_id).unwrap().status(), SalesOrderStatus::Loaded);
    }

    #[test]
    fn delivery_only_touches_the_orders_own_buffer_lots() {
        let fx = setup();
        let r = route_line(&fx);
        let p = fx.product("yerba");
        fx.lot(p, r.origin, 20, 0);
        let mine = fx.order(&[(p, 5)]);
        let other = fx.order(&[(p, 8)]);
        assemble(
            &fx,
            &r,
            vec![demand(mine, &[(p, 5)]), demand(other, &[(p, 8)])],
            vec![],
        )
        .unwrap();

        fx.engine
            .reconcile_delivery(
                mine,
                vec![DeliveredLine {
                    product_id: p,
                    delivered: 5,
                }],
                fx.actor,
            )
            .unwrap();

        let buffer = fx.config.embark_buffer_warehouse;
        assert_eq!(fx.engine.stock_on_hand(p, buffer).unwrap(), 8);
        assert_eq!(fx.engine.stock_on_hand(p, r.tara).unwrap(), 0);
    }

    // ---- incidents -----------------------------------------------------------

    #[test]
    fn short_receipt_files_an_incident_backed_by_a_compensating_lot() {
        let fx = setup();
        let (p, w) = (fx.product("leche"), fx.warehouse("deposito"));

        let receipt = fx
            .engine
            .receive_stock(
                ReceiveStock {
                    product_id: p,
                    warehouse_id: w,
                    expected: 100,
                    received: 95,
                    unit_cost: 120,
                    source_ref: Some("remito 77".to_string()),
                    received_at: None,
                    location: None,
                },
                fx.actor,
            )
            .unwrap();

        assert_eq!(receipt.lot.quantity(), 95);
        assert_eq!(receipt.movement.kind(), MovementKind::Receiving);
        let incident = receipt.incident.unwrap();
        assert!(!incident.is_resolved());
        assert_eq!(incident.lines().len(), 1);
        let line = &incident.lines()[0];
        assert_eq!(line.quantity_difference, 5);
        assert_eq!(line.reference_lot, receipt.lot.id_typed());

        let compensating = fx.engine.lot(line.lot_id).unwrap();
        assert_eq!(compensating.quantity(), 5);
        assert_eq!(compensating.warehouse_id(), fx.config.incidents_warehouse);
        assert_eq!(compensating.parent_lot_id(), Some(receipt.lot.id_typed()));
        assert_eq!(compensating.unit_cost(), 120);
        let adjustment = fx.engine.movement(incident.adjustment_movement().unwrap()).unwrap();
        assert_eq!(adjustment.kind(), MovementKind::IncidentAdjustment);

        assert_eq!(fx.engine.open_incidents().unwrap().len(), 1);

        let attended = fx
            .engine
            .attend_incident_line(line.id, Some("proveedor acredita".to_string()), fx.actor)
            .unwrap();
        assert!(attended.is_resolved());
        assert!(fx.engine.open_incidents().unwrap().is_empty());

        let err = fx.engine.attend_incident_line(line.id, None, fx.actor).unwrap_err();
        assert_eq!(err.kind(), "invalid_state_transition");
    }

    #[test]
    fn incident_resolves_only_when_every_line_is_attended() {
        let fx = setup();
        let (p, q, w) = (fx.product("leche"), fx.product("queso"), fx.warehouse("deposito"));
        let a = fx.lot(p, w, 10, 0);
        let b = fx.lot(q, w, 10, 0);

        let incident = fx
            .engine
            .report_incident(
                "conteo fisico",
                vec![
                    IncidentLineInput {
                        product_id: p,
                        quantity_difference: 2,
                        reference_lot: a.id_typed(),
                    },
                    IncidentLineInput {
                        product_id: q,
                        quantity_difference: 1,
                        reference_lot: b.id_typed(),
                    },
                ],
                fx.actor,
            )
            .unwrap();

        let first = fx
            .engine
            .attend_incident_line(incident.lines()[0].id, None, fx.actor)
            .unwrap();
        assert!(!first.is_resolved());
        let second = fx
            .engine
            .attend_incident_line(incident.lines()[1].id, None, fx.actor)
            .unwrap();
        assert!(second.is_resolved());
    }

    #[test]
    fn incident_line_must_match_its_reference_lot() {
        let fx = setup();
        let (p, q, w) = (fx.product("leche"), fx.product("queso"), fx.warehouse("deposito"));
        let lot = fx.lot(p, w, 10, 0);
        let before = fx.snapshot();

        let err = fx
            .engine
            .report_incident(
                "conteo fisico",
                vec![IncidentLineInput {
                    product_id: q,
                    quantity_difference: 2,
                    reference_lot: lot.id_typed(),
                }],
                fx.actor,
            )
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(fx.snapshot(), before);
        assert!(fx.engine.open_incidents().unwrap().is_empty());
    }

    #[test]
    fn attending_an_unknown_line_is_not_found() {
        let fx = setup();
        let err = fx
            .engine
            .attend_incident_line(lotflow_incidents::IncidentLineId::generate(), None, fx.actor)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    // ---- notifications -------------------------------------------------------

    #[test]
    fn notifications_follow_committed_operations_only() {
        let fx = setup();
        let sub = fx.bus.subscribe();
        let p = fx.product("cafe");
        let (w1, w2) = (fx.warehouse("w1"), fx.warehouse("w2"));

        let transfer_id = fx.request_transfer(w2, w1, &[(p, 3)]);
        let types: Vec<String> = sub.drain().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["transfer.requested"]);

        fx.engine.approve_transfer(transfer_id, fx.actor, None).unwrap_err();
        assert!(sub.drain().is_empty());

        fx.engine.reject_transfer(transfer_id, fx.actor, None).unwrap();
        let envelopes = sub.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["transfer.rejected", "transfer.requested"]);
        assert_eq!(envelopes[0].aggregate_id(), transfer_id.0);
        assert_eq!(envelopes[0].aggregate_type(), "transfer_request");
        assert_eq!(envelopes[0].actor_id(), fx.actor);
    }

    // ---- properties ----------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Property: across any sequence of sales, stock on hand plus what the
        /// sale movements recorded always equals what was received, and a
        /// rejected sale changes nothing.
        #[test]
        fn sales_conserve_received_stock(
            quantities in prop::collection::vec(1i64..50, 1..6),
            requests in prop::collection::vec(1i64..80, 1..10),
        ) {
            let fx = setup();
            let (p, w) = (fx.product("arroz"), fx.warehouse("sucursal"));
            for (age, quantity) in quantities.iter().enumerate() {
                fx.lot(p, w, *quantity, age as i64);
            }
            let received: i64 = quantities.iter().sum();
            let mut sold = 0;

            for requested in requests {
                let preview = fx.engine.allocate_fifo(p, w, requested).unwrap();
                let before = fx.snapshot();
                match fx.engine.commit_allocation(&preview, MovementKind::Sale, fx.actor, None) {
                    Ok(lines) => {
                        prop_assert_eq!(lines.iter().map(|l| l.quantity).sum::<i64>(), requested);
                        sold += requested;
                    }
                    Err(err) => {
                        prop_assert_eq!(err.kind(), "insufficient_stock");
                        prop_assert_eq!(fx.snapshot(), before);
                    }
                }
                prop_assert!(fx.snapshot().iter().all(|l| l.quantity() >= 0));
                prop_assert_eq!(fx.engine.stock_on_hand(p, w).unwrap() + sold, received);
            }
        }
    }
}
