//! This file serves as the root for all SeaORM entity modules.
//! Users submit meter readings, managers verify them, and verified readings
//! are turned into invoices.

pub mod invoice;
pub mod meter_reading;
pub mod user;

pub use meter_reading::MeterType;
pub use user::UserRole;

pub mod prelude {
    //! A prelude module for easy importing of all entities.
    pub use super::invoice::Entity as Invoice;
    pub use super::meter_reading::Entity as MeterReading;
    pub use super::user::Entity as User;
}
