//! Paper exchange.
//!
//! Simulated exchange account held in memory: balances, tickers, netted
//! positions and an order book of resting trigger orders. Market orders and
//! marketable limits fill at the ticker price. Margin moves from `free` to
//! `used` on fills; realized PnL is not simulated.
//!
//! Failures can be injected for the next order calls, for all trigger
//! (stop-loss / take-profit) orders, or for every call while offline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{
    AccountBalance, CurrencyBalance, ExchangeClient, ExchangeError, ExchangeOrder,
    ExchangePosition, PlaceOrderRequest, Ticker, Trade,
};
use crate::domain::margin::{Position, PositionSide};
use crate::domain::order_execution::{OrderSide, OrderType};
use crate::domain::shared::Symbol;

const DEFAULT_QUOTE: &str = "USDT";

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    /// Signed size; negative is short.
    contracts: Decimal,
    entry_price: Decimal,
    leverage: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    balances: HashMap<String, CurrencyBalance>,
    prices: HashMap<Symbol, Decimal>,
    leverage: HashMap<Symbol, Decimal>,
    positions: HashMap<Symbol, PaperPosition>,
    orders: Vec<ExchangeOrder>,
    trades: Vec<Trade>,
    client_ids: HashSet<String>,
    order_failures: VecDeque<ExchangeError>,
    stalled_responses: VecDeque<Duration>,
    trigger_failure: Option<ExchangeError>,
    offline: Option<ExchangeError>,
    next_id: u64,
}

impl PaperState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }

    fn quote_balance(&mut self, symbol: &Symbol) -> &mut CurrencyBalance {
        let currency = symbol.quote_currency().unwrap_or(DEFAULT_QUOTE);
        self.balances.entry(currency.to_string()).or_default()
    }

    /// Net a fill into the symbol's position, moving margin between free and used.
    fn apply_fill(
        &mut self,
        request: &PlaceOrderRequest,
        price: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        let leverage = self
            .leverage
            .get(&request.symbol)
            .copied()
            .unwrap_or(Decimal::ONE);
        let current = self.positions.get(&request.symbol).copied();
        let signed = match request.side {
            OrderSide::Buy => request.amount,
            OrderSide::Sell => -request.amount,
        };

        let opposing = current
            .filter(|p| !p.contracts.is_zero() && p.contracts.is_sign_negative() != signed.is_sign_negative());
        let closing = opposing.map_or(Decimal::ZERO, |p| p.contracts.abs().min(request.amount));

        if request.reduce_only && closing.is_zero() {
            return Err(ExchangeError::Rejected {
                reason: "reduce-only order would increase position".to_string(),
            });
        }
        let opening = if request.reduce_only {
            Decimal::ZERO
        } else {
            request.amount - closing
        };
        let filled = closing + opening;

        let overflow = || ExchangeError::OrderSize {
            message: format!("order notional for {} is out of range", request.symbol),
        };
        let margin_of = |amount: Decimal, price: Decimal, leverage: Decimal| {
            amount
                .checked_mul(price)
                .and_then(|notional| notional.checked_div(leverage))
                .ok_or_else(overflow)
        };
        let required = margin_of(opening, price, leverage)?;
        let released = match opposing {
            Some(p) => margin_of(closing, p.entry_price, p.leverage)?,
            None => Decimal::ZERO,
        };
        let balance = self.quote_balance(&request.symbol);
        let budget = balance.free.checked_add(released).ok_or_else(overflow)?;
        if required > budget {
            return Err(ExchangeError::InsufficientBalance {
                message: format!(
                    "order requires {} margin, {} free",
                    required.round_dp(8).normalize(),
                    balance.free.normalize()
                ),
            });
        }
        balance.free = budget - required;
        balance.used = (balance.used - released)
            .checked_add(required)
            .ok_or_else(overflow)?
            .max(Decimal::ZERO);

        let sign = if signed.is_sign_negative() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        };
        let next = match current {
            Some(p) if opposing.is_some() => {
                let remaining = p.contracts + sign * closing;
                if opening.is_zero() {
                    PaperPosition {
                        contracts: remaining,
                        ..p
                    }
                } else {
                    PaperPosition {
                        contracts: sign * opening,
                        entry_price: price,
                        leverage,
                    }
                }
            }
            Some(p) if !p.contracts.is_zero() => {
                let size = p.contracts.abs();
                let cost = size
                    .checked_mul(p.entry_price)
                    .zip(opening.checked_mul(price))
                    .and_then(|(held, added)| held.checked_add(added));
                let total = size.checked_add(opening);
                let entry_price = cost
                    .zip(total)
                    .and_then(|(cost, total)| cost.checked_div(total))
                    .ok_or_else(overflow)?;
                PaperPosition {
                    contracts: p.contracts.checked_add(signed).ok_or_else(overflow)?,
                    entry_price,
                    leverage,
                }
            }
            _ => PaperPosition {
                contracts: signed,
                entry_price: price,
                leverage,
            },
        };

        if next.contracts.is_zero() {
            self.positions.remove(&request.symbol);
        } else {
            self.positions.insert(request.symbol.clone(), next);
        }
        Ok(filled)
    }
}

/// In-memory simulated exchange account.
#[derive(Debug)]
pub struct PaperExchange {
    name: String,
    latency: Option<Duration>,
    state: Mutex<PaperState>,
    place_calls: AtomicU32,
}

impl PaperExchange {
    /// Empty account on an exchange called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: None,
            state: Mutex::new(PaperState::default()),
            place_calls: AtomicU32::new(0),
        }
    }

    /// Set the free balance of a currency.
    #[must_use]
    pub fn with_balance(self, currency: &str, amount: Decimal) -> Self {
        self.state.lock().balances.insert(
            currency.to_ascii_uppercase(),
            CurrencyBalance {
                free: amount,
                used: Decimal::ZERO,
                total: amount,
            },
        );
        self
    }

    /// Set the ticker price of a symbol.
    #[must_use]
    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    /// Seed an open position; its margin is moved to `used`.
    #[must_use]
    pub fn with_position(self, position: &Position) -> Self {
        {
            let mut state = self.state.lock();
            let margin = position.margin().unwrap_or_else(|e| {
                tracing::warn!(symbol = %position.symbol, error = %e, "Seeded position margin not posted");
                Decimal::ZERO
            });
            let balance = state.quote_balance(&position.symbol);
            balance.free -= margin;
            balance.used += margin;
            let contracts = match position.side {
                PositionSide::Long => position.size,
                PositionSide::Short => -position.size,
            };
            state.positions.insert(
                position.symbol.clone(),
                PaperPosition {
                    contracts,
                    entry_price: position.entry_price,
                    leverage: position.leverage,
                },
            );
        }
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Change a ticker price.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(Symbol::new(symbol), price);
    }

    /// Fail the next `place_order` calls with these errors, in order.
    pub fn fail_next_orders(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().order_failures.extend(errors);
    }

    /// Accept the next order, then hold its response back for `delay`.
    pub fn stall_next_response(&self, delay: Duration) {
        self.state.lock().stalled_responses.push_back(delay);
    }

    /// Fail every stop-loss / take-profit order with `error`.
    pub fn fail_trigger_orders(&self, error: ExchangeError) {
        self.state.lock().trigger_failure = Some(error);
    }

    /// Fail every call with `error` until set back to `None`.
    pub fn set_offline(&self, error: Option<ExchangeError>) {
        self.state.lock().offline = error;
    }

    /// Number of `place_order` calls received, failed ones included.
    #[must_use]
    pub fn place_order_calls(&self) -> u32 {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Orders accepted with exactly this client order id.
    #[must_use]
    pub fn orders_for(&self, client_order_id: &str) -> Vec<ExchangeOrder> {
        self.state
            .lock()
            .orders
            .iter()
            .filter(|o| o.client_order_id.as_deref() == Some(client_order_id))
            .cloned()
            .collect()
    }

    /// Balance of one currency.
    #[must_use]
    pub fn balance(&self, currency: &str) -> CurrencyBalance {
        self.state
            .lock()
            .balances
            .get(&currency.to_ascii_uppercase())
            .copied()
            .unwrap_or_default()
    }

    async fn enter(&self) -> Result<(), ExchangeError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.state.lock().offline {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn price_of(state: &PaperState, symbol: &Symbol) -> Result<Decimal, ExchangeError> {
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidSymbol {
                symbol: symbol.to_string(),
            })
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<ExchangeOrder, ExchangeError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let (order, stall) = {
            let mut state = self.state.lock();
            let is_trigger = request.order_type.requires_stop_price();
            if is_trigger && let Some(error) = &state.trigger_failure {
                return Err(error.clone());
            }
            if let Some(error) = state.order_failures.pop_front() {
                return Err(error);
            }
            if state.client_ids.contains(&request.client_order_id) {
                return Err(ExchangeError::Rejected {
                    reason: format!("duplicate client order id {}", request.client_order_id),
                });
            }
            if request.amount <= Decimal::ZERO {
                return Err(ExchangeError::OrderSize {
                    message: format!("amount {} below minimum", request.amount),
                });
            }
            let last = Self::price_of(&state, &request.symbol)?;

            let marketable = match (request.order_type, request.price) {
                (OrderType::Market, _) => true,
                (OrderType::Limit, Some(limit)) => match request.side {
                    OrderSide::Buy => limit >= last,
                    OrderSide::Sell => limit <= last,
                },
                _ => false,
            };

            let id = state.next_id();
            let now = Utc::now();
            let (status, filled, average) = if marketable {
                let filled = state.apply_fill(request, last)?;
                state.trades.push(Trade {
                    id: format!("{id}-t"),
                    order_id: id.clone(),
                    symbol: request.symbol.to_string(),
                    side: request.side.as_str().to_string(),
                    price: last,
                    amount: filled,
                    fee: None,
                    timestamp: now,
                });
                ("closed", filled, Some(last))
            } else {
                ("open", Decimal::ZERO, None)
            };

            let order = ExchangeOrder {
                id,
                client_order_id: Some(request.client_order_id.clone()),
                symbol: request.symbol.to_string(),
                side: request.side.as_str().to_string(),
                order_type: request.order_type.to_string().to_ascii_lowercase(),
                amount: request.amount,
                price: request.price,
                stop_price: request.stop_price,
                average,
                filled,
                status: status.to_string(),
                reduce_only: request.reduce_only,
                timestamp: Some(now),
            };
            state.client_ids.insert(request.client_order_id.clone());
            state.orders.push(order.clone());
            let stall = state.stalled_responses.pop_front();
            (order, stall)
        };

        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(order)
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(state
            .positions
            .iter()
            .map(|(symbol, p)| ExchangePosition {
                symbol: symbol.to_string(),
                side: Some(if p.contracts.is_sign_negative() { "short" } else { "long" }.to_string()),
                contracts: p.contracts.abs(),
                entry_price: Some(p.entry_price),
                leverage: Some(p.leverage),
            })
            .collect())
    }

    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(AccountBalance {
            balances: state.balances.clone(),
        })
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        let last = Self::price_of(&state, symbol)?;
        Ok(Ticker {
            symbol: symbol.clone(),
            last,
            bid: Some(last),
            ask: Some(last),
            timestamp: Utc::now(),
        })
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: Decimal) -> Result<(), ExchangeError> {
        self.enter().await?;
        if leverage < Decimal::ONE {
            return Err(ExchangeError::Rejected {
                reason: format!("leverage {leverage} out of range"),
            });
        }
        self.state.lock().leverage.insert(symbol.clone(), leverage);
        Ok(())
    }

    async fn fetch_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|o| o.status == "open")
            .filter(|o| symbol.is_none_or(|s| o.symbol == s.as_str()))
            .cloned()
            .collect())
    }

    async fn fetch_order_by_client_id(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> Result<Option<ExchangeOrder>, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .find(|o| o.symbol == symbol.as_str() && o.client_order_id.as_deref() == Some(client_order_id))
            .cloned())
    }

    async fn fetch_my_trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ExchangeError> {
        self.enter().await?;
        let state = self.state.lock();
        let mut trades: Vec<Trade> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol.as_str())
            .cloned()
            .collect();
        let skip = trades.len().saturating_sub(limit);
        Ok(trades.split_off(skip))
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn exchange() -> PaperExchange {
        PaperExchange::new("paper")
            .with_balance("USDT", dec!(1000))
            .with_price("BTCUSDT", dec!(50000))
    }

    fn market(cid: &str, side: OrderSide, amount: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            client_order_id: cid.to_string(),
            symbol: Symbol::new("BTCUSDT"),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            stop_price: None,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn fills_move_margin_to_used() {
        let ex = exchange();
        ex.set_leverage(&Symbol::new("BTCUSDT"), dec!(10)).await.unwrap();
        let order = ex.place_order(&market("a", OrderSide::Buy, dec!(0.01))).await.unwrap();

        assert_eq!(order.status, "closed");
        assert_eq!(order.filled, dec!(0.01));
        let usdt = ex.balance("USDT");
        assert_eq!(usdt.used, dec!(50));
        assert_eq!(usdt.free, dec!(950));
        assert_eq!(usdt.total, dec!(1000));
    }

    #[tokio::test]
    async fn closing_releases_margin() {
        let ex = exchange();
        ex.place_order(&market("a", OrderSide::Buy, dec!(0.01))).await.unwrap();
        ex.place_order(&market("b", OrderSide::Sell, dec!(0.01))).await.unwrap();

        assert!(ex.fetch_positions().await.unwrap().is_empty());
        assert_eq!(ex.balance("USDT").free, dec!(1000));
    }

    #[tokio::test]
    async fn reversal_opens_the_remainder() {
        let ex = exchange();
        ex.place_order(&market("a", OrderSide::Buy, dec!(0.01))).await.unwrap();
        ex.place_order(&market("b", OrderSide::Sell, dec!(0.03))).await.unwrap();

        let positions = ex.fetch_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side.as_deref(), Some("short"));
        assert_eq!(positions[0].contracts, dec!(0.02));
    }

    #[tokio::test]
    async fn duplicate_client_ids_are_rejected() {
        let ex = exchange();
        ex.place_order(&market("a", OrderSide::Buy, dec!(0.001))).await.unwrap();
        let err = ex
            .place_order(&market("a", OrderSide::Buy, dec!(0.001)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { .. }));
        assert_eq!(ex.orders_for("a").len(), 1);
        assert_eq!(ex.place_order_calls(), 2);
    }

    #[tokio::test]
    async fn exchange_side_margin_check() {
        let ex = PaperExchange::new("paper")
            .with_balance("USDT", dec!(10))
            .with_price("BTCUSDT", dec!(50000));
        let err = ex
            .place_order(&market("a", OrderSide::Buy, dec!(0.001)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn oversized_fill_is_refused_without_touching_balances() {
        let ex = exchange().with_price("BTCUSDT", dec!(100000000000));
        let err = ex
            .place_order(&market("huge", OrderSide::Buy, dec!(1000000000000000000000)))
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::OrderSize { .. }));
        assert_eq!(ex.balance("USDT").free, dec!(1000));
        assert!(ex.fetch_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let ex = exchange();
        ex.fail_next_orders([ExchangeError::Network {
            message: "connection reset".to_string(),
        }]);
        assert!(ex.place_order(&market("a", OrderSide::Buy, dec!(0.001))).await.is_err());
        assert!(ex.place_order(&market("a", OrderSide::Buy, dec!(0.001))).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_response_fills_before_it_returns() {
        let ex = exchange();
        ex.stall_next_response(Duration::from_secs(30));
        let request = market("slow", OrderSide::Buy, dec!(0.001));

        let outcome = tokio::time::timeout(Duration::from_secs(1), ex.place_order(&request)).await;
        assert!(outcome.is_err());

        let found = ex
            .fetch_order_by_client_id(&Symbol::new("BTCUSDT"), "slow")
            .await
            .unwrap()
            .expect("order recorded before the response");
        assert_eq!(found.status, "closed");
        assert_eq!(found.filled, dec!(0.001));
        assert!(ex
            .fetch_order_by_client_id(&Symbol::new("BTCUSDT"), "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn offline_fails_every_call() {
        let ex = exchange();
        ex.set_offline(Some(ExchangeError::Unavailable {
            message: "maintenance".to_string(),
        }));
        assert!(ex.ping().await.is_err());
        assert!(ex.fetch_balance().await.is_err());
        ex.set_offline(None);
        assert!(ex.ping().await.is_ok());
    }

    #[tokio::test]
    async fn resting_limit_is_listed_as_open() {
        let ex = exchange();
        let mut request = market("a", OrderSide::Buy, dec!(0.001));
        request.order_type = OrderType::Limit;
        request.price = Some(dec!(40000));
        let order = ex.place_order(&request).await.unwrap();

        assert_eq!(order.status, "open");
        assert_eq!(ex.fetch_open_orders(None).await.unwrap().len(), 1);
    }
}
