//! Exchange Adapter Service
//!
//! Normalizes orders, positions and balances over an [`ExchangeClient`] and
//! runs the bracket saga for stop-loss / take-profit legs.
//!
//! Every client call is bounded by `call_timeout`; expiry surfaces as
//! [`ExchangeError::Timeout`] so it classifies as `TIMEOUT`.
//!
//! # Bracket saga
//!
//! The primary order is placed first and is final once accepted. Each
//! bracket leg is then placed once, reduce-only, on the opposite side. A leg
//! that fails is recorded in [`Order::bracket_failures`]; the primary is never
//! unwound.
//!
//! When a submission ended without a response, [`ExchangeAdapter::recover_order`]
//! looks the primary up by client order id and places only the legs that are
//! still missing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::application::ports::{
    AccountBalance, ExchangeClient, ExchangeError, ExchangeOrder, ExchangePosition,
    PlaceOrderRequest, PriceCache, Ticker, Trade,
};
use crate::domain::margin::{
    BalanceCheck, BalanceValidationResult, MarginError, MarginParams, MarginValidator,
    OrderMargin, Position, PositionSide,
};
use crate::domain::order_execution::{
    BracketFailure, BracketKind, BracketOrder, Order, OrderRequest, OrderSide, OrderStatus,
    OrderType,
};
use crate::domain::shared::{ClientOrderId, ExchangeOrderId, Symbol};
use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, TradingError};
use crate::observability::metrics;

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct ExchangeAdapterConfig {
    /// Deadline for each exchange call.
    pub call_timeout: Duration,
    /// Currency margin is posted in.
    pub quote_currency: String,
}

impl Default for ExchangeAdapterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            quote_currency: "USDT".to_string(),
        }
    }
}

/// Adapter error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Exchange call failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Margin inputs were unusable.
    #[error("position size validation failed: {0}")]
    Margin(#[from] MarginError),
}

impl Classify for AdapterError {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        match self {
            Self::Exchange(e) => e.classify_with(classifier, context),
            Self::Margin(_) => {
                classifier.error(ErrorCategory::ValidationError, self.to_string(), context.clone())
            }
        }
    }
}

/// Normalizing facade over one exchange account.
pub struct ExchangeAdapter {
    client: Arc<dyn ExchangeClient>,
    price_cache: Option<Arc<dyn PriceCache>>,
    validator: MarginValidator,
    config: ExchangeAdapterConfig,
}

impl std::fmt::Debug for ExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAdapter")
            .field("exchange", &self.client.exchange_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExchangeAdapter {
    /// Adapter over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn ExchangeClient>, config: ExchangeAdapterConfig) -> Self {
        Self {
            client,
            price_cache: None,
            validator: MarginValidator::new(),
            config,
        }
    }

    /// Consult `cache` before fetching tickers.
    #[must_use]
    pub fn with_price_cache(mut self, cache: Arc<dyn PriceCache>) -> Self {
        self.price_cache = Some(cache);
        self
    }

    /// Exchange name.
    #[must_use]
    pub fn exchange_name(&self) -> &str {
        self.client.exchange_name()
    }

    /// Canonical form of an exchange symbol.
    #[must_use]
    pub fn normalize_symbol(&self, raw: &str) -> Symbol {
        Symbol::new(raw)
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Place the primary order, then its bracket legs.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let primary = PlaceOrderRequest {
            client_order_id: request.client_order_id.to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            amount: request.amount,
            price: request.price,
            stop_price: None,
            reduce_only: request.reduce_only,
        };

        let started = std::time::Instant::now();
        let result = self
            .call("place_order", self.client.place_order(&primary))
            .await;
        let latency = started.elapsed().as_secs_f64();

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_order_submission(self.exchange_name(), "error", latency);
                return Err(e);
            }
        };

        let mut order = self.normalize_order(raw, Some(request))?;
        metrics::record_order_submission(
            self.exchange_name(),
            &order.status.to_string().to_ascii_lowercase(),
            latency,
        );

        tracing::info!(
            exchange = %self.exchange_name(),
            client_order_id = %order.client_order_id,
            exchange_order_id = %order.id,
            symbol = %order.symbol,
            status = %order.status,
            filled = %order.filled,
            "Order placed"
        );

        if request.has_brackets()
            && !matches!(order.status, OrderStatus::Rejected | OrderStatus::Canceled)
        {
            self.place_brackets(request, &mut order, false).await;
        }

        Ok(order)
    }

    /// Find an order an earlier, unanswered submission left on the exchange.
    ///
    /// Returns `None` when the exchange has no order with the request's
    /// client order id, meaning it is safe to place it again.
    pub async fn recover_order(&self, request: &OrderRequest) -> Result<Option<Order>, ExchangeError> {
        let Some(raw) = self.find_by_client_id(&request.symbol, &request.client_order_id).await? else {
            return Ok(None);
        };

        let mut order = self.normalize_order(raw, Some(request))?;
        tracing::warn!(
            exchange = %self.exchange_name(),
            client_order_id = %order.client_order_id,
            exchange_order_id = %order.id,
            status = %order.status,
            "Recovered order from unconfirmed submission"
        );

        if request.has_brackets()
            && !matches!(order.status, OrderStatus::Rejected | OrderStatus::Canceled)
        {
            self.place_brackets(request, &mut order, true).await;
        }
        Ok(Some(order))
    }

    async fn find_by_client_id(
        &self,
        symbol: &Symbol,
        client_order_id: &ClientOrderId,
    ) -> Result<Option<ExchangeOrder>, ExchangeError> {
        self.call(
            "fetch_order",
            self.client.fetch_order_by_client_id(symbol, client_order_id.as_str()),
        )
        .await
    }

    async fn place_brackets(&self, request: &OrderRequest, order: &mut Order, recovering: bool) {
        let amount = if order.filled > Decimal::ZERO {
            order.filled
        } else {
            order.amount
        };

        let legs = [
            (BracketKind::StopLoss, request.stop_loss),
            (BracketKind::TakeProfit, request.take_profit),
        ];

        for (kind, trigger) in legs {
            let Some(trigger_price) = trigger else {
                continue;
            };
            let client_order_id = request.client_order_id.child(kind.suffix());
            if recovering {
                match self.find_by_client_id(&request.symbol, &client_order_id).await {
                    Ok(Some(ack)) => {
                        order.brackets.push(BracketOrder {
                            kind,
                            exchange_order_id: ExchangeOrderId::new(ack.id),
                            client_order_id,
                            trigger_price,
                        });
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(
                        client_order_id = %client_order_id,
                        error = %e,
                        "Bracket lookup failed, placing leg"
                    ),
                }
            }
            let leg = PlaceOrderRequest {
                client_order_id: client_order_id.to_string(),
                symbol: request.symbol.clone(),
                side: request.side.opposite(),
                order_type: kind.order_type(),
                amount,
                price: None,
                stop_price: Some(trigger_price),
                reduce_only: true,
            };

            match self.call("place_bracket", self.client.place_order(&leg)).await {
                Ok(ack) => order.brackets.push(BracketOrder {
                    kind,
                    exchange_order_id: ExchangeOrderId::new(ack.id),
                    client_order_id,
                    trigger_price,
                }),
                Err(e) => {
                    tracing::warn!(
                        exchange = %self.exchange_name(),
                        client_order_id = %client_order_id,
                        kind = kind.as_str(),
                        trigger_price = %trigger_price,
                        error = %e,
                        "Bracket leg failed, primary order stands"
                    );
                    metrics::record_bracket_failure(self.exchange_name(), kind.as_str());
                    order.bracket_failures.push(BracketFailure {
                        kind,
                        trigger_price,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Open orders, optionally for one symbol.
    pub async fn get_open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, ExchangeError> {
        let raw = self
            .call("fetch_open_orders", self.client.fetch_open_orders(symbol))
            .await?;
        raw.into_iter()
            .map(|o| self.normalize_order(o, None))
            .collect()
    }

    /// The account's recent trades on a symbol.
    pub async fn get_my_trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ExchangeError> {
        self.call("fetch_my_trades", self.client.fetch_my_trades(symbol, limit))
            .await
    }

    /// Normalize an exchange order.
    ///
    /// Fields the exchange omits are taken from `request` when given.
    pub fn normalize_order(
        &self,
        raw: ExchangeOrder,
        request: Option<&OrderRequest>,
    ) -> Result<Order, ExchangeError> {
        let side = OrderSide::parse(&raw.side)
            .or_else(|| request.map(|r| r.side))
            .ok_or_else(|| ExchangeError::Other {
                message: format!("unrecognised order side {:?} on order {}", raw.side, raw.id),
            })?;

        let order_type = parse_order_type(&raw.order_type)
            .or_else(|| request.map(|r| r.order_type))
            .unwrap_or(OrderType::Market);

        let status = OrderStatus::from_exchange(&raw.status).unwrap_or_else(|| {
            tracing::debug!(status = %raw.status, order_id = %raw.id, "Unknown exchange order status");
            if raw.filled >= raw.amount && raw.amount > Decimal::ZERO {
                OrderStatus::Filled
            } else if raw.filled > Decimal::ZERO {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Open
            }
        });

        let client_order_id = raw
            .client_order_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ClientOrderId::new)
            .or_else(|| request.map(|r| r.client_order_id.clone()))
            .unwrap_or_else(|| ClientOrderId::new(raw.id.clone()));

        Ok(Order {
            id: ExchangeOrderId::new(raw.id),
            client_order_id,
            symbol: self.normalize_symbol(&raw.symbol),
            side,
            order_type,
            amount: raw.amount,
            price: raw.price.or(raw.stop_price),
            average_price: raw.average,
            filled: raw.filled,
            status,
            reduce_only: raw.reduce_only,
            leverage: request.map_or(Decimal::ONE, |r| r.leverage),
            created_at: raw.timestamp.unwrap_or_else(Utc::now),
            brackets: Vec::new(),
            bracket_failures: Vec::new(),
        })
    }

    // ========================================================================
    // Account state
    // ========================================================================

    /// Open positions, normalized.
    pub async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let raw = self
            .call("fetch_positions", self.client.fetch_positions())
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|p| self.normalize_position(p))
            .collect())
    }

    fn normalize_position(&self, raw: ExchangePosition) -> Option<Position> {
        if raw.contracts.is_zero() {
            return None;
        }
        let side = match raw.side.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("long" | "buy") => PositionSide::Long,
            Some("short" | "sell") => PositionSide::Short,
            _ if raw.contracts < Decimal::ZERO => PositionSide::Short,
            _ => PositionSide::Long,
        };
        Some(Position {
            symbol: self.normalize_symbol(&raw.symbol),
            side,
            size: raw.contracts.abs(),
            entry_price: raw.entry_price.unwrap_or(Decimal::ZERO),
            leverage: raw.leverage.unwrap_or(Decimal::ONE),
        })
    }

    /// All balances.
    pub async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
        self.call("fetch_balance", self.client.fetch_balance()).await
    }

    /// Account equity in the quote currency that positions are margined from.
    pub async fn get_available_margin(&self) -> Result<Decimal, ExchangeError> {
        let balance = self.get_balance().await?;
        Ok(balance.currency(&self.config.quote_currency).total)
    }

    /// Ticker, served from the price cache when fresh.
    pub async fn get_ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError> {
        if let Some(cache) = &self.price_cache
            && let Some(ticker) = cache.get(self.exchange_name(), symbol)
        {
            return Ok(ticker);
        }

        let ticker = self
            .call("fetch_ticker", self.client.fetch_ticker(symbol))
            .await?;
        if let Some(cache) = &self.price_cache {
            cache.put(self.exchange_name(), ticker.clone());
        }
        Ok(ticker)
    }

    /// Set leverage for a symbol.
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: Decimal) -> Result<(), ExchangeError> {
        self.call("set_leverage", self.client.set_leverage(symbol, leverage))
            .await
    }

    /// Connectivity check.
    pub async fn ping(&self) -> Result<(), ExchangeError> {
        self.call("ping", self.client.ping()).await
    }

    // ========================================================================
    // Margin
    // ========================================================================

    /// Check `request` against `available_balance` and the account's positions.
    ///
    /// Orders without a price are valued at the ticker's last price.
    pub async fn validate_balance(
        &self,
        request: &OrderRequest,
        available_balance: Decimal,
    ) -> Result<BalanceValidationResult, AdapterError> {
        let price = match request.price {
            Some(price) => price,
            None => self.get_ticker(&request.symbol).await?.last,
        };
        let positions = self.get_positions().await?;

        let result = self.validator.validate_balance(&BalanceCheck {
            available_balance,
            order: OrderMargin {
                params: MarginParams {
                    amount: request.amount,
                    price,
                    leverage: request.leverage,
                },
                side: request.side,
            },
            symbol: &request.symbol,
            existing_positions: &positions,
        })?;

        tracing::debug!(
            exchange = %self.exchange_name(),
            symbol = %request.symbol,
            required_margin = %result.required_margin,
            free_margin = %result.free_margin,
            margin_delta = %result.margin_delta,
            is_valid = result.is_valid,
            "Balance validated"
        );
        Ok(result)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, ExchangeError>>,
    ) -> Result<T, ExchangeError> {
        tokio::time::timeout(self.config.call_timeout, future)
            .await
            .unwrap_or_else(|_| {
                Err(ExchangeError::Timeout {
                    operation,
                    timeout_ms: self.config.call_timeout.as_millis() as u64,
                })
            })
    }
}

fn parse_order_type(value: &str) -> Option<OrderType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "stop" | "stop_market" | "stop_loss" => Some(OrderType::StopMarket),
        "take_profit" | "take_profit_market" => Some(OrderType::TakeProfitMarket),
        other => OrderType::parse(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::PaperExchange;
    use rust_decimal_macros::dec;

    fn request(cid: &str) -> OrderRequest {
        OrderRequest {
            client_order_id: ClientOrderId::new(cid),
            symbol: Symbol::new("BTCUSDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            amount: dec!(0.001),
            price: None,
            leverage: dec!(10),
            stop_loss: None,
            take_profit: None,
            reduce_only: false,
        }
    }

    fn paper() -> Arc<PaperExchange> {
        Arc::new(
            PaperExchange::new("paper")
                .with_balance("USDT", dec!(1000))
                .with_price("BTCUSDT", dec!(50000)),
        )
    }

    fn adapter(exchange: Arc<PaperExchange>) -> ExchangeAdapter {
        ExchangeAdapter::new(exchange, ExchangeAdapterConfig::default())
    }

    #[tokio::test]
    async fn market_order_fills_and_echoes_client_id() {
        let adapter = adapter(paper());
        let order = adapter.place_order(&request("sig-1")).await.unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.client_order_id.as_str(), "sig-1");
        assert_eq!(order.filled, dec!(0.001));
        assert_eq!(order.average_price, Some(dec!(50000)));
    }

    #[tokio::test]
    async fn bracket_failure_keeps_primary() {
        let exchange = paper();
        exchange.fail_trigger_orders(ExchangeError::Rejected {
            reason: "stop price would trigger immediately".to_string(),
        });
        let adapter = adapter(Arc::clone(&exchange));

        let mut req = request("sig-2");
        req.stop_loss = Some(dec!(49000));
        req.take_profit = Some(dec!(52000));
        let order = adapter.place_order(&req).await.unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.brackets.is_empty());
        assert_eq!(order.bracket_failures.len(), 2);
        assert!(!order.brackets_complete());
    }

    #[tokio::test]
    async fn bracket_legs_use_child_ids_and_opposite_side() {
        let exchange = paper();
        let adapter = adapter(Arc::clone(&exchange));

        let mut req = request("sig-3");
        req.stop_loss = Some(dec!(49000));
        let order = adapter.place_order(&req).await.unwrap();

        assert_eq!(order.brackets.len(), 1);
        assert_eq!(order.brackets[0].client_order_id.as_str(), "sig-3-sl");

        let open = adapter.get_open_orders(None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].side, OrderSide::Sell);
        assert_eq!(open[0].order_type, OrderType::StopMarket);
        assert!(open[0].reduce_only);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_exchange_times_out() {
        let exchange = Arc::new(
            PaperExchange::new("paper")
                .with_balance("USDT", dec!(1000))
                .with_price("BTCUSDT", dec!(50000))
                .with_latency(Duration::from_secs(60)),
        );
        let adapter = ExchangeAdapter::new(
            exchange,
            ExchangeAdapterConfig {
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );

        let err = adapter.ping().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout { operation: "ping", .. }));
        let classified = err.classify_with(&ErrorClassifier::default(), &ErrorContext::new());
        assert_eq!(classified.category(), ErrorCategory::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_order_is_recovered_with_missing_legs() {
        let exchange = paper();
        exchange.stall_next_response(Duration::from_secs(60));
        let adapter = ExchangeAdapter::new(
            Arc::clone(&exchange) as Arc<dyn ExchangeClient>,
            ExchangeAdapterConfig {
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );
        let mut req = request("sig-4");
        req.stop_loss = Some(dec!(49000));
        req.take_profit = Some(dec!(52000));

        let err = adapter.place_order(&req).await.unwrap_err();
        assert!(err.outcome_unknown());
        assert_eq!(exchange.orders_for("sig-4").len(), 1);

        let order = adapter.recover_order(&req).await.unwrap().expect("primary on exchange");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.client_order_id.as_str(), "sig-4");
        assert!(order.brackets_complete());
        assert_eq!(order.brackets.len(), 2);

        let again = adapter.recover_order(&req).await.unwrap().expect("still there");
        assert_eq!(again.brackets.len(), 2);
        assert_eq!(exchange.orders_for("sig-4-sl").len(), 1);
        assert_eq!(exchange.orders_for("sig-4-tp").len(), 1);
        assert_eq!(exchange.place_order_calls(), 3);
    }

    #[tokio::test]
    async fn recover_finds_nothing_for_unknown_id() {
        let adapter = adapter(paper());
        assert!(adapter.recover_order(&request("never-sent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validate_balance_uses_ticker_for_market_orders() {
        let adapter = adapter(paper());
        let mut req = request("sig-4");
        req.amount = dec!(0.01);

        let ok = adapter.validate_balance(&req, dec!(100)).await.unwrap();
        assert!(ok.is_valid);
        assert_eq!(ok.required_margin, dec!(50));

        let short = adapter.validate_balance(&req, dec!(40)).await.unwrap();
        assert!(!short.is_valid);
        assert!(short.message.is_some());
    }

    #[tokio::test]
    async fn positions_are_normalized() {
        let exchange = paper();
        let adapter = adapter(Arc::clone(&exchange));
        adapter
            .set_leverage(&Symbol::new("BTCUSDT"), dec!(10))
            .await
            .unwrap();
        adapter.place_order(&request("sig-5")).await.unwrap();

        let positions = adapter.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Long);
        assert_eq!(positions[0].size, dec!(0.001));
        assert_eq!(positions[0].leverage, dec!(10));
    }

    #[test]
    fn normalize_falls_back_to_request_fields() {
        let adapter = adapter(paper());
        let raw = ExchangeOrder {
            id: "x-1".to_string(),
            client_order_id: None,
            symbol: "BTC/USDT:USDT".to_string(),
            side: "BUY".to_string(),
            order_type: "weird".to_string(),
            amount: dec!(1),
            price: None,
            stop_price: None,
            average: None,
            filled: dec!(0.4),
            status: "mystery".to_string(),
            reduce_only: false,
            timestamp: None,
        };
        let order = adapter.normalize_order(raw, Some(&request("sig-6"))).unwrap();
        assert_eq!(order.client_order_id.as_str(), "sig-6");
        assert_eq!(order.symbol.as_str(), "BTCUSDT");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.order_type, OrderType::Market);
    }
}
