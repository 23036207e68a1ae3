use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warehouse_core::{Decision, DomainError, EntityKey, EntityStateMachine};
use warehouse_events::{Command, CommandDecodeError, Event, EventDecodeError};

/// Entity state: a product stocked in the warehouse.
///
/// Field names on the wire follow the catalogue schema (`imageURL`, camelCase).
/// Missing fields decode to their zero values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub price: f64,
    pub stock: i64,
    pub tags: Vec<String>,
}

impl Product {
    fn with_stock_delta(mut self, delta: i64) -> Result<Self, DomainError> {
        let stock = self
            .stock
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("stock overflow"))?;
        if stock < 0 {
            return Err(DomainError::invariant(format!(
                "stock cannot go negative (current: {}, delta: {delta})",
                self.stock
            )));
        }
        self.stock = stock;
        Ok(self)
    }
}

/// Command: ReceiveProduct (payload is the product itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiveProduct {
    pub product: Product,
}

/// Command: UpdateStock.
///
/// `stock` is accepted as a legacy name for `stockDelta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStock {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "stock")]
    pub stock_delta: i64,
}

/// Command: GetProductDetails (read-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProductDetails {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InventoryCommand {
    ReceiveProduct(ReceiveProduct),
    UpdateStock(UpdateStock),
    GetProductDetails(GetProductDetails),
}

impl Command for InventoryCommand {
    fn kind(&self) -> &'static str {
        match self {
            InventoryCommand::ReceiveProduct(_) => "ReceiveProduct",
            InventoryCommand::UpdateStock(_) => "UpdateStock",
            InventoryCommand::GetProductDetails(_) => "GetProductDetails",
        }
    }

    fn decode(kind: &str, payload: JsonValue) -> Result<Self, CommandDecodeError> {
        let invalid = |e: serde_json::Error| CommandDecodeError::payload(kind, e);
        match kind {
            "ReceiveProduct" => serde_json::from_value(payload)
                .map(InventoryCommand::ReceiveProduct)
                .map_err(invalid),
            "UpdateStock" => serde_json::from_value(payload)
                .map(InventoryCommand::UpdateStock)
                .map_err(invalid),
            "GetProductDetails" => match payload {
                // The lookup is keyed by the entity id alone, so a bare string is fine.
                JsonValue::String(id) => {
                    Ok(InventoryCommand::GetProductDetails(GetProductDetails { id }))
                }
                other => serde_json::from_value(other)
                    .map(InventoryCommand::GetProductDetails)
                    .map_err(invalid),
            },
            other => Err(CommandDecodeError::UnknownKind(other.to_string())),
        }
    }
}

/// Event: ProductReceived. Carries the full product so the fold is self-contained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductReceived {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub price: f64,
    pub stock: i64,
    pub tags: Vec<String>,
}

impl From<&Product> for ProductReceived {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            image_url: p.image_url.clone(),
            price: p.price,
            stock: p.stock,
            tags: p.tags.clone(),
        }
    }
}

impl From<ProductReceived> for Product {
    fn from(e: ProductReceived) -> Self {
        Self {
            id: e.id,
            name: e.name,
            description: e.description,
            image_url: e.image_url,
            price: e.price,
            stock: e.stock,
            tags: e.tags,
        }
    }
}

/// Event: StockChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChanged {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "stock")]
    pub stock_delta: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InventoryEvent {
    ProductReceived(ProductReceived),
    StockChanged(StockChanged),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductReceived(_) => "ProductReceived",
            InventoryEvent::StockChanged(_) => "StockChanged",
        }
    }

    fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            InventoryEvent::ProductReceived(e) => serde_json::to_value(e),
            InventoryEvent::StockChanged(e) => serde_json::to_value(e),
        }
    }

    fn decode(event_type: &str, payload: JsonValue) -> Result<Option<Self>, EventDecodeError> {
        let invalid = |e: serde_json::Error| EventDecodeError::new(event_type, e);
        match event_type {
            "ProductReceived" => serde_json::from_value(payload)
                .map(|e| Some(InventoryEvent::ProductReceived(e)))
                .map_err(invalid),
            "StockChanged" => serde_json::from_value(payload)
                .map(|e| Some(InventoryEvent::StockChanged(e)))
                .map_err(invalid),
            _ => Ok(None),
        }
    }
}

impl EntityStateMachine for Product {
    const ENTITY_TYPE: &'static str = "warehouse.product";

    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Reply = Product;
    type Error = DomainError;

    fn initial_state(_key: &EntityKey) -> Self {
        Product::default()
    }

    fn apply(self, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            // Re-receiving a product overwrites whatever was there.
            InventoryEvent::ProductReceived(e) => {
                if e.stock < 0 {
                    return Err(DomainError::invariant("received stock cannot be negative"));
                }
                Ok(Product::from(e.clone()))
            }
            InventoryEvent::StockChanged(e) => self.with_stock_delta(e.stock_delta),
        }
    }

    fn handle(
        &self,
        command: &Self::Command,
    ) -> Result<Decision<Self::Event, Self::Reply>, Self::Error> {
        match command {
            InventoryCommand::ReceiveProduct(cmd) => self.handle_receive(cmd),
            InventoryCommand::UpdateStock(cmd) => self.handle_update_stock(cmd),
            InventoryCommand::GetProductDetails(_) => Ok(Decision::reply(self.clone())),
        }
    }
}

impl Product {
    fn handle_receive(
        &self,
        cmd: &ReceiveProduct,
    ) -> Result<Decision<InventoryEvent, Product>, DomainError> {
        if cmd.product.stock < 0 {
            return Err(DomainError::invariant("received stock cannot be negative"));
        }

        // The reply echoes the input regardless of prior state.
        Ok(Decision::emit(
            vec![InventoryEvent::ProductReceived(ProductReceived::from(
                &cmd.product,
            ))],
            cmd.product.clone(),
        ))
    }

    fn handle_update_stock(
        &self,
        cmd: &UpdateStock,
    ) -> Result<Decision<InventoryEvent, Product>, DomainError> {
        let event = InventoryEvent::StockChanged(StockChanged {
            id: cmd.id.clone(),
            stock_delta: cmd.stock_delta,
        });

        // The reply is the state after the event, derived through the fold
        // rather than by editing the current state.
        let next = self.clone().apply(&event)?;
        Ok(Decision::emit(vec![event], next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use warehouse_core::fold;
    use warehouse_events::execute;

    fn key() -> EntityKey {
        EntityKey::new("5c61f497e5fdadefe84ff9b9").unwrap()
    }

    fn yoga_mat() -> Product {
        Product {
            id: "p1".to_string(),
            name: "Yoga Mat".to_string(),
            description: "Limited Edition Mat".to_string(),
            image_url: "/static/images/yogamat_square.jpg".to_string(),
            price: 62.5,
            stock: 5,
            tags: vec!["mat".to_string()],
        }
    }

    fn receive(p: Product) -> InventoryCommand {
        InventoryCommand::ReceiveProduct(ReceiveProduct { product: p })
    }

    fn update(delta: i64) -> InventoryCommand {
        InventoryCommand::UpdateStock(UpdateStock {
            id: "p1".to_string(),
            stock_delta: delta,
        })
    }

    #[test]
    fn initial_state_is_zero_valued() {
        let state = Product::initial_state(&key());
        assert_eq!(state, Product::default());
        assert_eq!(state.stock, 0);
        assert!(state.id.is_empty());
        assert!(state.tags.is_empty());
    }

    #[test]
    fn receive_product_echoes_input_and_emits_one_event() {
        let state = Product::initial_state(&key());
        let (next, decision) = execute(state, &receive(yoga_mat())).unwrap();

        assert_eq!(decision.reply, yoga_mat());
        assert_eq!(decision.events.len(), 1);
        assert_eq!(
            decision.events[0],
            InventoryEvent::ProductReceived(ProductReceived::from(&yoga_mat()))
        );
        assert_eq!(next, yoga_mat());
    }

    #[test]
    fn update_stock_returns_updated_state() {
        let state = Product::initial_state(&key());
        let (state, first) = execute(state, &receive(yoga_mat())).unwrap();
        let (state, second) = execute(state, &update(10)).unwrap();

        assert_eq!(second.reply.stock, 15);
        assert_eq!(second.reply, state);
        assert_eq!(first.events.len() + second.events.len(), 2);
        match &second.events[0] {
            InventoryEvent::StockChanged(e) => assert_eq!(e.stock_delta, 10),
            other => panic!("Expected StockChanged event, got {other:?}"),
        }
    }

    #[test]
    fn get_product_details_is_read_only() {
        let state = Product::initial_state(&key());
        let (state, _) = execute(state, &receive(yoga_mat())).unwrap();
        let (state, _) = execute(state, &update(10)).unwrap();

        let cmd = InventoryCommand::GetProductDetails(GetProductDetails {
            id: "p1".to_string(),
        });
        let (after, decision) = execute(state.clone(), &cmd).unwrap();

        assert!(decision.is_read_only());
        assert_eq!(decision.reply.stock, 15);
        assert_eq!(after, state);
    }

    #[test]
    fn receiving_again_overwrites_existing_product() {
        let state = Product::initial_state(&key());
        let (state, _) = execute(state, &receive(yoga_mat())).unwrap();
        let (state, _) = execute(state, &update(10)).unwrap();

        let replacement = Product {
            name: "Yoga Mat v2".to_string(),
            stock: 1,
            ..yoga_mat()
        };
        let (state, decision) = execute(state, &receive(replacement.clone())).unwrap();

        assert_eq!(decision.reply, replacement);
        assert_eq!(state, replacement);
    }

    #[test]
    fn update_stock_rejects_negative_result() {
        let state = Product::initial_state(&key());
        let (state, _) = execute(state, &receive(yoga_mat())).unwrap();

        let err = state.handle(&update(-6)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("negative") => {}
            other => panic!("Expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn receive_rejects_negative_stock() {
        let state = Product::initial_state(&key());
        let bad = Product {
            stock: -1,
            ..yoga_mat()
        };
        assert!(matches!(
            state.handle(&receive(bad)),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn apply_rejects_stock_changed_below_zero() {
        let event = InventoryEvent::StockChanged(StockChanged {
            id: "p1".to_string(),
            stock_delta: -1,
        });
        let err = Product::initial_state(&key()).apply(&event).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn decode_commands_by_kind() {
        let cmd = InventoryCommand::decode("UpdateStock", json!({"id": "p1", "stockDelta": 10}))
            .unwrap();
        assert_eq!(cmd, update(10));
        assert_eq!(cmd.kind(), "UpdateStock");

        // Legacy field name for the delta.
        let legacy =
            InventoryCommand::decode("UpdateStock", json!({"id": "p1", "stock": 10})).unwrap();
        assert_eq!(legacy, update(10));

        let details = InventoryCommand::decode("GetProductDetails", json!("p1")).unwrap();
        assert!(matches!(details, InventoryCommand::GetProductDetails(g) if g.id == "p1"));

        let received = InventoryCommand::decode(
            "ReceiveProduct",
            json!({"id": "p1", "name": "Yoga Mat", "description": "Limited Edition Mat",
                   "imageURL": "/static/images/yogamat_square.jpg", "price": 62.5,
                   "stock": 5, "tags": ["mat"]}),
        )
        .unwrap();
        assert_eq!(received, receive(yoga_mat()));
    }

    #[test]
    fn decode_rejects_unknown_command_kind() {
        let err = InventoryCommand::decode("DeleteProduct", json!({})).unwrap_err();
        assert_eq!(err, CommandDecodeError::UnknownKind("DeleteProduct".to_string()));
    }

    #[test]
    fn decode_reports_bad_payload() {
        let err = InventoryCommand::decode("UpdateStock", json!({"id": "p1"})).unwrap_err();
        assert!(matches!(err, CommandDecodeError::Payload { .. }));
    }

    #[test]
    fn events_decode_from_kind_and_payload() {
        let event = InventoryEvent::ProductReceived(ProductReceived::from(&yoga_mat()));
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["imageURL"], "/static/images/yogamat_square.jpg");

        let decoded = InventoryEvent::decode(event.event_type(), payload).unwrap();
        assert_eq!(decoded, Some(event));

        assert_eq!(InventoryEvent::decode("PriceChanged", json!({})).unwrap(), None);
        assert!(InventoryEvent::decode("StockChanged", json!({"id": 3})).is_err());
    }

    fn arb_event() -> impl Strategy<Value = InventoryEvent> {
        prop_oneof![
            (0i64..1_000).prop_map(|stock| InventoryEvent::ProductReceived(ProductReceived {
                id: "p1".to_string(),
                stock,
                ..ProductReceived::default()
            })),
            (-50i64..50).prop_map(|stock_delta| InventoryEvent::StockChanged(StockChanged {
                id: "p1".to_string(),
                stock_delta,
            })),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: folding the same events twice from the initial state
        /// yields identical results (state or error).
        #[test]
        fn replay_is_deterministic(events in prop::collection::vec(arb_event(), 0..40)) {
            let first = fold(Product::initial_state(&key()), &events);
            let second = fold(Product::initial_state(&key()), &events);
            prop_assert_eq!(first, second);
        }

        /// Property: resuming from any intermediate fold result equals the full fold.
        #[test]
        fn snapshot_resume_matches_full_fold(
            deltas in prop::collection::vec(0i64..20, 1..30),
            split in 0usize..30,
        ) {
            let mut events = vec![InventoryEvent::ProductReceived(ProductReceived::from(&yoga_mat()))];
            events.extend(deltas.into_iter().map(|d| InventoryEvent::StockChanged(StockChanged {
                id: "p1".to_string(),
                stock_delta: d,
            })));
            let split = split.min(events.len());

            let snapshot = fold(Product::initial_state(&key()), &events[..split]).unwrap();
            let resumed = fold(snapshot, &events[split..]).unwrap();
            let full = fold(Product::initial_state(&key()), &events).unwrap();
            prop_assert_eq!(resumed, full);
        }

        /// Property: no sequence of UpdateStock commands drives stock below zero;
        /// rejected commands leave the state untouched.
        #[test]
        fn stock_never_goes_negative(deltas in prop::collection::vec(-30i64..30, 1..50)) {
            let (mut state, _) = execute(Product::initial_state(&key()), &receive(yoga_mat())).unwrap();

            for delta in deltas {
                match execute(state.clone(), &update(delta)) {
                    Ok((next, decision)) => {
                        prop_assert!(next.stock >= 0);
                        prop_assert_eq!(decision.events.len(), 1);
                        state = next;
                    }
                    Err(DomainError::InvariantViolation(_)) => {
                        prop_assert!(state.stock + delta < 0);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
                }
            }
        }
    }
}
