//! Storage adapters for the ports.

pub mod postgres_marketplace;
pub mod postgres_payment_repository;

pub use postgres_marketplace::PostgresMarketplace;
pub use postgres_payment_repository::PostgresPaymentRepository;
