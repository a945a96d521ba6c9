//! Persistence for orders, invoices and payment attempts.

pub mod invoices;
pub mod orders;
pub mod payments;

pub use invoices::{InMemoryInvoiceRepository, InvoiceRepository};
pub use orders::{InMemoryOrderRepository, OrderRepository};
pub use payments::{InMemoryPaymentLedger, PaymentLedger};
