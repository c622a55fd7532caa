pub mod auth;
pub mod health;
pub mod invoices;
pub mod meter_readings;
