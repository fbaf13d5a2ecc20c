pub mod fulfillments;
pub mod ops;
pub mod webhook;
