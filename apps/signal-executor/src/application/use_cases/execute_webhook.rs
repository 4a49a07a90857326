//! Execute Webhook Use Case
//!
//! Runs one signed webhook through the execution pipeline:
//!
//! ```text
//! Received → SignatureVerified → Parsed → Validated → BalanceChecked → Submitted
//!          → Filled | Open | Rejected | DeadLettered
//! ```
//!
//! Every failure is classified once into a [`TradingError`] and ends in one of
//! three dispositions: rejected back to the caller, rescheduled on the queue,
//! or dead-lettered. Failures before the signature is trusted are never
//! queued.
//!
//! A placement that times out or loses its connection may still have reached
//! the exchange. Later attempts, inline or from the queue, look the client
//! order id up before sending the order again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::application::ports::{
    AccountResolver, Alert, AlertPort, DeadLetter, ExecutionJob, JobQueue, OrderRepository,
    PriceCache, QueueError, ResolvedAccount, StoredOrder,
};
use crate::application::services::{
    AdapterError, BalanceSnapshotCache, ExchangeAdapter, ExchangeAdapterConfig, ExecutionLocks,
};
use crate::domain::order_execution::{Order, OrderRequest, OrderStatus};
use crate::domain::shared::ClientOrderId;
use crate::domain::signal::{ParseOptions, WebhookPayload, signature};
use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, TradingError};
use crate::observability::metrics;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, RetryFailure, RetryPolicyManager,
};

/// Pipeline stage reached by an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStage {
    /// Body accepted, nothing checked yet.
    Received,
    /// HMAC matched the account secret.
    SignatureVerified,
    /// Body parsed into a signal.
    Parsed,
    /// Order intent passed validation.
    Validated,
    /// Free margin covers the order.
    BalanceChecked,
    /// Sent to the exchange.
    Submitted,
    /// Completely filled.
    Filled,
    /// Accepted and resting.
    Open,
    /// Refused; not retried.
    Rejected,
    /// Parked for operator triage.
    DeadLettered,
}

impl ExecutionStage {
    /// Lowercase label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::SignatureVerified => "signature_verified",
            Self::Parsed => "parsed",
            Self::Validated => "validated",
            Self::BalanceChecked => "balance_checked",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Open => "open",
            Self::Rejected => "rejected",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Returned to the caller only.
    Rejected,
    /// Stored as a dead letter.
    DeadLettered,
    /// Put back on the queue.
    Rescheduled {
        /// Visibility delay.
        delay: Duration,
    },
}

impl FailureDisposition {
    /// Lowercase label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::DeadLettered => "dead_lettered",
            Self::Rescheduled { .. } => "rescheduled",
        }
    }
}

/// Result of running one webhook.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The exchange accepted the order.
    Executed {
        /// Normalized order.
        order: Order,
        /// `Filled` or `Open`.
        stage: ExecutionStage,
    },
    /// The signal was executed before; nothing was sent.
    AlreadyExecuted {
        /// The earlier order.
        order: Order,
    },
    /// The same signal is executing right now.
    InFlight {
        /// Idempotency key.
        client_order_id: ClientOrderId,
    },
    /// Execution failed.
    Failed {
        /// Stage whose check failed.
        stage: ExecutionStage,
        /// Classified failure.
        error: TradingError,
        /// What was done with the job.
        disposition: FailureDisposition,
    },
}

impl ExecutionOutcome {
    /// Order, when one exists.
    #[must_use]
    pub const fn order(&self) -> Option<&Order> {
        match self {
            Self::Executed { order, .. } | Self::AlreadyExecuted { order } => Some(order),
            _ => None,
        }
    }

    /// Classified failure, when execution failed.
    #[must_use]
    pub const fn error(&self) -> Option<&TradingError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Leverage when the signal names none.
    pub default_leverage: Decimal,
    /// Reject signals older than this.
    pub max_signal_age: Option<chrono::Duration>,
    /// Longest retry delay slept inline; longer ones are rescheduled.
    pub max_inline_retry_delay: Option<Duration>,
    /// Balance snapshot max age.
    pub balance_max_age: Duration,
    /// Exchange adapter settings.
    pub adapter: ExchangeAdapterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_leverage: Decimal::ONE,
            max_signal_age: None,
            max_inline_retry_delay: Some(Duration::from_secs(5)),
            balance_max_age: Duration::from_secs(5),
            adapter: ExchangeAdapterConfig::default(),
        }
    }
}

struct Failure {
    stage: ExecutionStage,
    error: TradingError,
    queueable: bool,
    deferred: Option<Duration>,
    retries: u32,
    /// The order may be live on the exchange.
    unconfirmed: bool,
}

impl Failure {
    fn new(stage: ExecutionStage, error: TradingError) -> Self {
        Self {
            stage,
            error,
            queueable: true,
            deferred: None,
            retries: 0,
            unconfirmed: false,
        }
    }

    fn rejected(stage: ExecutionStage, error: TradingError) -> Self {
        Self {
            queueable: false,
            ..Self::new(stage, error)
        }
    }

    fn from_retry(stage: ExecutionStage, failure: RetryFailure) -> Self {
        match failure {
            RetryFailure::GaveUp { error, attempts } => Self {
                retries: attempts,
                ..Self::new(stage, error)
            },
            RetryFailure::Deferred {
                error,
                attempt,
                delay,
            } => Self {
                deferred: Some(delay),
                retries: attempt,
                ..Self::new(stage, error)
            },
        }
    }
}

/// The webhook execution pipeline.
pub struct WebhookExecutionPipeline<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    accounts: Arc<C>,
    repository: Arc<R>,
    queue: Arc<Q>,
    alerts: Arc<A>,
    classifier: Arc<ErrorClassifier>,
    retry: Arc<RetryPolicyManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    balances: Arc<BalanceSnapshotCache>,
    locks: ExecutionLocks,
    price_cache: Option<Arc<dyn PriceCache>>,
    config: PipelineConfig,
}

impl<C, R, Q, A> WebhookExecutionPipeline<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    /// Pipeline with default classification, retry policies and breakers.
    pub fn new(
        accounts: Arc<C>,
        repository: Arc<R>,
        queue: Arc<Q>,
        alerts: Arc<A>,
        config: PipelineConfig,
    ) -> Self {
        let classifier = Arc::new(ErrorClassifier::default());
        Self {
            accounts,
            repository,
            queue,
            alerts,
            retry: Arc::new(RetryPolicyManager::new(Arc::clone(&classifier))),
            classifier,
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            balances: Arc::new(BalanceSnapshotCache::new(config.balance_max_age)),
            locks: ExecutionLocks::new(),
            price_cache: None,
            config,
        }
    }

    /// Replace the retry manager (and the classifier it carries) and the
    /// breaker registry.
    #[must_use]
    pub fn with_resilience(
        mut self,
        retry: Arc<RetryPolicyManager>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        self.classifier = Arc::new(retry.classifier().clone());
        self.retry = retry;
        self.breakers = breakers;
        self
    }

    /// Share a ticker cache between adapters.
    #[must_use]
    pub fn with_price_cache(mut self, cache: Arc<dyn PriceCache>) -> Self {
        self.price_cache = Some(cache);
        self
    }

    /// Breaker registry.
    pub const fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Order repository.
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Job queue.
    pub const fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    /// Classifier.
    pub const fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// Execution locks.
    pub const fn locks(&self) -> &ExecutionLocks {
        &self.locks
    }

    /// Run a webhook through the pipeline.
    pub async fn execute(&self, job: &ExecutionJob) -> ExecutionOutcome {
        let span = tracing::info_span!(
            "execute_webhook",
            account_id = %job.account_id,
            job_id = %job.id,
            attempt = job.attempt,
        );

        async {
            let outcome = match self.run(job).await {
                Ok(outcome) => outcome,
                Err(failure) => self.fail(job, failure).await,
            };
            match &outcome {
                ExecutionOutcome::Executed { stage, .. } => {
                    metrics::record_webhook_outcome("executed", stage.as_str());
                }
                ExecutionOutcome::AlreadyExecuted { .. } => {
                    metrics::record_webhook_outcome("already_executed", "validated");
                }
                ExecutionOutcome::InFlight { .. } => {
                    metrics::record_webhook_outcome("in_flight", "validated");
                }
                ExecutionOutcome::Failed {
                    stage, disposition, ..
                } => metrics::record_webhook_outcome(disposition.as_str(), stage.as_str()),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Put a dead letter back on the queue for a fresh run.
    pub async fn requeue_dead_letter(&self, id: Uuid) -> Result<Option<ExecutionJob>, QueueError> {
        let Some(letter) = self.queue.take_dead_letter(id).await? else {
            return Ok(None);
        };
        let job = ExecutionJob {
            attempt: 0,
            not_before: Utc::now(),
            ..letter.job.clone()
        };
        if let Err(e) = self.queue.enqueue(job.clone()).await {
            // Put it back so the letter is not lost.
            self.queue.dead_letter(letter).await?;
            return Err(e);
        }
        tracing::info!(dead_letter_id = %id, job_id = %job.id, "Dead letter requeued");
        Ok(Some(job))
    }

    async fn run(&self, job: &ExecutionJob) -> Result<ExecutionOutcome, Failure> {
        let mut context = ErrorContext::for_account(job.account_id.as_str())
            .with("job_id", job.id)
            .with("queue_attempt", job.attempt);

        // The account supplies the secret, so it resolves first.
        let account = self
            .accounts
            .resolve(&job.account_id)
            .await
            .map_err(|e| {
                Failure::rejected(
                    ExecutionStage::SignatureVerified,
                    e.classify_with(&self.classifier, &context),
                )
            })?;
        context = context.with("exchange", &account.exchange);

        signature::verify(&account.webhook_secret, &job.body, job.signature.as_deref()).map_err(
            |e| {
                self.reject(
                    ExecutionStage::SignatureVerified,
                    ErrorCategory::AuthenticationError,
                    e,
                    &context,
                )
            },
        )?;

        let payload = WebhookPayload::parse(
            &job.body,
            ParseOptions {
                now: Utc::now(),
                max_age: self.config.max_signal_age,
            },
        )
        .map_err(|e| {
            self.reject(ExecutionStage::Parsed, ErrorCategory::ValidationError, e, &context)
        })?;

        let request = payload.to_order_request(self.config.default_leverage);
        context = context
            .with("client_order_id", &request.client_order_id)
            .with("symbol", &request.symbol);
        request.validate().map_err(|e| {
            self.reject(ExecutionStage::Validated, ErrorCategory::ValidationError, e, &context)
        })?;

        // Idempotency is decided under the per-signal lock.
        let Some(_guard) = self.locks.try_acquire(&job.account_id, &request.client_order_id) else {
            tracing::warn!(client_order_id = %request.client_order_id, "Duplicate in flight");
            return Ok(ExecutionOutcome::InFlight {
                client_order_id: request.client_order_id,
            });
        };

        let prior = self
            .retry
            .with_retry(&context, || {
                self.repository
                    .find_by_client_order_id(&job.account_id, &request.client_order_id)
            })
            .await
            .map_err(|e| Failure::new(ExecutionStage::Validated, e))?;
        if let Some(prior) = prior {
            tracing::info!(
                client_order_id = %request.client_order_id,
                exchange_order_id = %prior.order.id,
                "Signal already executed"
            );
            return Ok(ExecutionOutcome::AlreadyExecuted { order: prior.order });
        }

        let breaker = self
            .breakers
            .get_or_create(&account.exchange, job.account_id.as_str());
        if let Some(retry_after) = breaker.remaining_open() {
            let open: CircuitBreakerError<AdapterError> = CircuitBreakerError::Open {
                name: breaker.name().to_string(),
                retry_after,
            };
            return Err(Failure {
                deferred: Some(retry_after),
                ..Failure::new(
                    ExecutionStage::Submitted,
                    open.classify_with(&self.classifier, &context),
                )
            });
        }

        let adapter = self.adapter(&account);
        if job.submission_unconfirmed {
            let (adapter, request) = (&adapter, &request);
            let recovered = self
                .guarded(&breaker, &context, move || async move {
                    adapter.recover_order(request).await.map_err(AdapterError::from)
                })
                .await
                .map_err(|f| Failure {
                    unconfirmed: true,
                    ..Failure::from_retry(ExecutionStage::Submitted, f)
                })?;
            if let Some(order) = recovered {
                self.balances.invalidate(&job.account_id);
                return self.complete(&account, order, &context).await;
            }
        }

        let validation = {
            let (adapter, request, balances) = (&adapter, &request, &self.balances);
            let account_id = &job.account_id;
            self.guarded(&breaker, &context, move || async move {
                let (available, _cached) = balances
                    .get_or_fetch(account_id, adapter.get_available_margin())
                    .await?;
                adapter.validate_balance(request, available).await
            })
            .await
            .map_err(|f| Failure::from_retry(ExecutionStage::BalanceChecked, f))?
        };

        if !validation.is_valid {
            metrics::record_balance_rejection(&account.exchange);
            let message = validation
                .message
                .unwrap_or_else(|| format!("insufficient balance for {}", request.symbol));
            return Err(Failure::new(
                ExecutionStage::BalanceChecked,
                self.classifier.error(
                    ErrorCategory::InsufficientBalance,
                    message,
                    context
                        .with("required_margin", validation.required_margin)
                        .with("free_margin", validation.free_margin)
                        .with("margin_delta", validation.margin_delta),
                ),
            ));
        }

        let Some(reservation) = self.balances.try_reserve(
            &job.account_id,
            validation.margin_delta,
            validation.free_margin,
        ) else {
            metrics::record_balance_rejection(&account.exchange);
            return Err(Failure::new(
                ExecutionStage::BalanceChecked,
                self.classifier.error(
                    ErrorCategory::InsufficientBalance,
                    format!(
                        "insufficient margin for {}: free margin is held by in-flight orders",
                        request.symbol
                    ),
                    context
                        .with("free_margin", validation.free_margin)
                        .with("margin_delta", validation.margin_delta),
                ),
            ));
        };

        // Submit through breaker and retry.
        let unconfirmed = AtomicBool::new(false);
        let submitted = self
            .guarded(&breaker, &context, || self.submit(&adapter, &request, &unconfirmed))
            .await;
        self.balances.invalidate(&job.account_id);
        drop(reservation);

        let order = submitted.map_err(|f| Failure {
            unconfirmed: unconfirmed.load(Ordering::Acquire),
            ..Failure::from_retry(ExecutionStage::Submitted, f)
        })?;
        self.complete(&account, order, &context).await
    }

    /// Set leverage and place the order.
    ///
    /// After a placement that ended without an answer, the next attempt
    /// looks the client order id up instead of sending a duplicate.
    async fn submit(
        &self,
        adapter: &ExchangeAdapter,
        request: &OrderRequest,
        unconfirmed: &AtomicBool,
    ) -> Result<Order, AdapterError> {
        if unconfirmed.load(Ordering::Acquire)
            && let Some(order) = adapter.recover_order(request).await?
        {
            return Ok(order);
        }
        adapter.set_leverage(&request.symbol, request.leverage).await?;
        adapter.place_order(request).await.map_err(|e| {
            if e.outcome_unknown() {
                unconfirmed.store(true, Ordering::Release);
            }
            AdapterError::from(e)
        })
    }

    async fn complete(
        &self,
        account: &ResolvedAccount,
        order: Order,
        context: &ErrorContext,
    ) -> Result<ExecutionOutcome, Failure> {
        for failure in &order.bracket_failures {
            let error = self
                .classifier
                .classify(&failure.error, Some("BracketOrder"), context.clone())
                .with_context("bracket", failure.kind.as_str())
                .with_context("trigger_price", failure.trigger_price);
            self.raise_alert(Alert::from_error(&error)).await;
        }

        let stored = StoredOrder {
            account_id: account.account_id.clone(),
            exchange: account.exchange.clone(),
            order: order.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(error) = self
            .retry
            .with_retry(context, || self.repository.save_order(&stored))
            .await
        {
            // The order is live on the exchange; report it and alert.
            tracing::error!(
                client_order_id = %order.client_order_id,
                exchange_order_id = %order.id,
                error = %error,
                "Order executed but not persisted"
            );
            metrics::record_classified_error(error.category());
            self.raise_alert(Alert::from_error(&error)).await;
        }

        let stage = if order.status == OrderStatus::Filled {
            ExecutionStage::Filled
        } else {
            ExecutionStage::Open
        };
        tracing::info!(
            client_order_id = %order.client_order_id,
            exchange_order_id = %order.id,
            status = %order.status,
            brackets = order.brackets.len(),
            bracket_failures = order.bracket_failures.len(),
            "Signal executed"
        );
        Ok(ExecutionOutcome::Executed { order, stage })
    }

    async fn guarded<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        context: &ErrorContext,
        mut operation: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let classifier = &self.classifier;
        self.retry
            .with_retry_budget(
                context,
                self.config.max_inline_retry_delay,
                |_| {},
                || {
                    let attempt = operation();
                    breaker.execute_filtered(
                        || attempt,
                        |e: &AdapterError| {
                            e.classify_with(classifier, context).should_circuit_break()
                        },
                    )
                },
            )
            .await
    }

    fn adapter(&self, account: &ResolvedAccount) -> ExchangeAdapter {
        let adapter =
            ExchangeAdapter::new(Arc::clone(&account.client), self.config.adapter.clone());
        match &self.price_cache {
            Some(cache) => adapter.with_price_cache(Arc::clone(cache)),
            None => adapter,
        }
    }

    fn reject(
        &self,
        stage: ExecutionStage,
        category: ErrorCategory,
        error: impl std::fmt::Display,
        context: &ErrorContext,
    ) -> Failure {
        Failure::rejected(
            stage,
            self.classifier.error(category, error.to_string(), context.clone()),
        )
    }

    async fn fail(&self, job: &ExecutionJob, failure: Failure) -> ExecutionOutcome {
        let Failure {
            stage,
            error,
            queueable,
            deferred,
            retries,
            unconfirmed,
        } = failure;
        let job = &ExecutionJob {
            submission_unconfirmed: job.submission_unconfirmed || unconfirmed,
            ..job.clone()
        };

        metrics::record_classified_error(error.category());
        let disposition = if queueable {
            self.dispose(job, &error, deferred, retries).await
        } else {
            FailureDisposition::Rejected
        };

        match disposition {
            FailureDisposition::Rescheduled { delay } => tracing::warn!(
                stage = %stage,
                category = %error.category(),
                delay_ms = delay.as_millis() as u64,
                error = %error.message(),
                "Execution rescheduled"
            ),
            _ => tracing::error!(
                stage = %stage,
                category = %error.category(),
                disposition = disposition.as_str(),
                alert_id = error.alert_id().unwrap_or(""),
                error = %error.message(),
                "Execution failed"
            ),
        }

        if error.requires_immediate_alert() {
            self.raise_alert(Alert::from_error(&error)).await;
        }

        ExecutionOutcome::Failed {
            stage,
            error,
            disposition,
        }
    }

    async fn dispose(
        &self,
        job: &ExecutionJob,
        error: &TradingError,
        deferred: Option<Duration>,
        retries: u32,
    ) -> FailureDisposition {
        if let Some(delay) = deferred
            && self.retry.should_retry(error, job.attempt)
        {
            let delay = delay.max(self.retry.calculate_delay(error, job.attempt));
            match self.queue.enqueue(job.rescheduled(delay, Utc::now())).await {
                Ok(()) => return FailureDisposition::Rescheduled { delay },
                Err(e) => tracing::error!(error = %e, "Reschedule failed, dead-lettering"),
            }
        }

        let letter = DeadLetter::new(job.clone(), error.clone(), job.attempt + retries);
        match self.queue.dead_letter(letter).await {
            Ok(()) => {
                metrics::record_dead_letter(error.category());
                FailureDisposition::DeadLettered
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %job.id, "Dead letter store failed");
                FailureDisposition::Rejected
            }
        }
    }

    async fn raise_alert(&self, alert: Alert) {
        if let Err(e) = self.alerts.notify(&alert).await {
            tracing::error!(alert_id = %alert.id, error = %e, "Alert delivery failed");
        }
    }
}
