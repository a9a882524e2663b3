pub mod downloads;
pub mod home;
pub mod instances;
