pub mod wellknown;
