pub mod catalog;
pub mod stock_ledger;
pub mod transfers;
