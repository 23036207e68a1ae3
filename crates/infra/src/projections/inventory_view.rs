//! Inventory frontend view: the product as shown to storefront readers.
//!
//! Unlike the entity, the view keeps the first `ProductReceived` it sees for a
//! key; later receives are ignored. Stock changes are added on top.

use warehouse_core::{EntityKey, EntityStateMachine};
use warehouse_events::{FoldError, Projection};
use warehouse_inventory::{InventoryEvent, Product};

pub const INVENTORY_FRONTEND_VIEW: &str = "inventory-frontend-view";

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryFrontendView;

impl Projection for InventoryFrontendView {
    type Ev = InventoryEvent;
    type State = Product;

    fn name(&self) -> &str {
        INVENTORY_FRONTEND_VIEW
    }

    fn handles(&self, entity_type: &str) -> bool {
        entity_type == Product::ENTITY_TYPE
    }

    fn apply(
        &self,
        key: &EntityKey,
        event: &InventoryEvent,
        prior: Option<&Product>,
    ) -> Result<Option<Product>, FoldError> {
        match (event, prior) {
            (InventoryEvent::ProductReceived(e), None) => Ok(Some(Product::from(e.clone()))),
            (InventoryEvent::ProductReceived(_), Some(existing)) => Ok(Some(existing.clone())),
            (InventoryEvent::StockChanged(_), None) => Err(FoldError::OrderingViolation(format!(
                "StockChanged for '{key}' before ProductReceived"
            ))),
            (InventoryEvent::StockChanged(e), Some(existing)) => {
                let stock = existing.stock.checked_add(e.stock_delta).ok_or_else(|| {
                    FoldError::InvariantViolation(format!("stock overflow for '{key}'"))
                })?;
                Ok(Some(Product {
                    stock,
                    ..existing.clone()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warehouse_inventory::{ProductReceived, StockChanged};

    use crate::projections::{ProjectionError, ViewProjector};

    fn key() -> EntityKey {
        EntityKey::new("p1").unwrap()
    }

    fn received(stock: i64, name: &str) -> InventoryEvent {
        InventoryEvent::ProductReceived(ProductReceived {
            id: "p1".to_string(),
            name: name.to_string(),
            stock,
            ..ProductReceived::default()
        })
    }

    fn changed(delta: i64) -> InventoryEvent {
        InventoryEvent::StockChanged(StockChanged {
            id: "p1".to_string(),
            stock_delta: delta,
        })
    }

    #[test]
    fn duplicate_stock_change_is_applied_once() {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        projector.apply(&key(), 1, &received(5, "Yoga Mat")).unwrap();
        projector.apply(&key(), 2, &changed(10)).unwrap();
        projector.apply(&key(), 2, &changed(10)).unwrap();

        let view = projector.get(&key()).unwrap().unwrap();
        assert_eq!(view.stock, 15);
        assert_eq!(view.name, "Yoga Mat");
    }

    #[test]
    fn first_receive_wins() {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        projector.apply(&key(), 1, &received(5, "Yoga Mat")).unwrap();
        projector.apply(&key(), 2, &received(40, "Renamed")).unwrap();

        let view = projector.get(&key()).unwrap().unwrap();
        assert_eq!(view.stock, 5);
        assert_eq!(view.name, "Yoga Mat");
        assert_eq!(projector.cursor(&key()).unwrap(), 2);
    }

    #[test]
    fn stock_change_without_product_is_an_ordering_violation() {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        let err = projector.apply(&key(), 1, &changed(3)).unwrap_err();

        assert!(matches!(err, ProjectionError::OrderingViolation { .. }));
        assert!(projector.get(&key()).unwrap().is_none());
    }

    #[test]
    fn raw_payloads_accept_legacy_delta_field() {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        projector
            .apply_raw(&key(), 1, "ProductReceived", json!({"id": "p1", "stock": 5}))
            .unwrap();
        let view = projector
            .apply_raw(&key(), 2, "StockChanged", json!({"id": "p1", "stock": -2}))
            .unwrap()
            .unwrap();

        assert_eq!(view.stock, 3);
    }

    #[test]
    fn only_product_streams_are_handled() {
        assert!(InventoryFrontendView.handles("warehouse.product"));
        assert!(!InventoryFrontendView.handles("warehouse.shelf"));
    }
}
