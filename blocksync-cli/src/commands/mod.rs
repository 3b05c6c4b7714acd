pub mod reconcile;
pub mod replay;
