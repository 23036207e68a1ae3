//! Warehouse inventory domain module (event-sourced).
//!
//! This crate contains the business rules for products held in the warehouse,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod product;

pub use product::{
    GetProductDetails, InventoryCommand, InventoryEvent, Product, ProductReceived,
    ReceiveProduct, StockChanged, UpdateStock,
};
