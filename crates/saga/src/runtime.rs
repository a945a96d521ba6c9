//! Assembles the saga components and their consumer workers.

use std::sync::Arc;

use event_log::{EventLog, InMemoryEventLog};
use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::authorizer::PaymentAuthorizer;
use crate::config::SagaConfig;
use crate::controller::{OrderSagaController, RecoveryReport};
use crate::dead_letter::{ConsumerWorker, DeadLetterRouter, MessageHandler};
use crate::error::Result;
use crate::invoice::InvoiceGenerator;
use crate::notification::{NotificationHub, NotificationTransport};
use crate::outbox::Outbox;
use crate::services::{
    InMemoryPaymentGateway, InMemoryStockService, PaymentGateway, StockService,
};
use crate::stores::{
    InMemoryInvoiceRepository, InMemoryOrderRepository, InMemoryPaymentLedger,
    InvoiceRepository, OrderRepository, PaymentLedger,
};
use crate::topics::{ORDERS, PAYMENTS};

/// Everything the saga talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub log: Arc<dyn EventLog>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub orders: Arc<dyn OrderRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub ledger: Arc<dyn PaymentLedger>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub stock: Arc<dyn StockService>,
    pub notifier: Arc<dyn NotificationTransport>,
}

impl Collaborators {
    /// In-process collaborators backed by a fresh in-memory log.
    pub fn in_memory(partitions: u32, notifier: Arc<dyn NotificationTransport>) -> Self {
        Self::in_memory_with_log(InMemoryEventLog::with_partitions(partitions), notifier)
    }

    /// In-process collaborators on top of an existing log.
    pub fn in_memory_with_log(
        log: InMemoryEventLog,
        notifier: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            log: Arc::new(log),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            invoices: Arc::new(InMemoryInvoiceRepository::new()),
            ledger: Arc::new(InMemoryPaymentLedger::new()),
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            stock: Arc::new(InMemoryStockService::new()),
            notifier,
        }
    }
}

/// The wired saga: controller, billing and the workers feeding them.
#[derive(Clone)]
pub struct Saga {
    pub controller: OrderSagaController,
    pub invoices: InvoiceGenerator,
    pub authorizer: PaymentAuthorizer,
    log: Arc<dyn EventLog>,
    router: DeadLetterRouter,
    config: SagaConfig,
}

impl Saga {
    pub fn new(collaborators: Collaborators, config: SagaConfig) -> Self {
        let Collaborators {
            log,
            idempotency,
            orders,
            invoices,
            ledger,
            gateway,
            stock,
            notifier,
        } = collaborators;

        let outbox = Outbox::new(Arc::clone(&log), Arc::clone(&idempotency));
        let authorizer = PaymentAuthorizer::new(
            gateway,
            Arc::clone(&idempotency),
            ledger,
            outbox.clone(),
            config.authorization_timeout,
        );
        let controller = OrderSagaController::new(
            orders,
            stock,
            Arc::clone(&idempotency),
            Arc::clone(&log),
            Arc::clone(&notifier),
            authorizer.clone(),
            outbox.clone(),
            config.authorization_backoff,
        );
        let invoice_generator = InvoiceGenerator::new(invoices, idempotency, notifier, outbox);
        let router = DeadLetterRouter::new(Arc::clone(&log), config.consumer_backoff);

        Self {
            controller,
            invoices: invoice_generator,
            authorizer,
            log,
            router,
            config,
        }
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Consumer workers: the controller on `orders` and `payments`, billing
    /// on `orders`.
    pub fn workers(&self) -> Vec<ConsumerWorker> {
        let controller: Arc<dyn MessageHandler> = Arc::new(self.controller.clone());
        let billing: Arc<dyn MessageHandler> = Arc::new(self.invoices.clone());

        [
            (Arc::clone(&controller), ORDERS),
            (controller, PAYMENTS),
            (billing, ORDERS),
        ]
        .into_iter()
        .map(|(handler, topic)| {
            ConsumerWorker::new(
                Arc::clone(&self.log),
                self.router.clone(),
                handler,
                topic,
                self.config.poll_interval,
            )
        })
        .collect()
    }

    /// Spawns every worker. They stop once `shutdown` turns true.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.workers()
            .into_iter()
            .flat_map(|worker| worker.spawn(shutdown.clone()))
            .collect()
    }

    /// Processes every pending message on every worker until all are idle.
    pub async fn drain(&self) -> Result<usize> {
        let workers = self.workers();
        let mut total = 0;
        loop {
            let mut handled = 0;
            for worker in &workers {
                handled += worker.drain().await?;
            }
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Runs the recovery pass of every producer.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = self.controller.recover().await?;
        report.republished += self.invoices.republish_unpublished().await?;
        Ok(report)
    }
}
