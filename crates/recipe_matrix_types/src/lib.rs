//! Shared types for the recipe-matrix crates.

mod normalized_key;
pub mod pin;

pub use normalized_key::NormalizedKey;
pub use pin::{PinExpression, PinExpressionError, apply_pin_expressions, increment};
