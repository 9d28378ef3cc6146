//! Position lifecycle management.
//!
//! Owns the mechanics between a sized entry decision and a journalled exit:
//! bracket or buffered-limit entries, monotone trailing stops with
//! server-side stop sync, client-side protective triggers for positions the
//! venue cannot bracket, set-once partial exits, and the micro-scaling
//! add-on ladder. Positions are recorded only after the venue accepts the
//! entry, and every mutation flows through the immutable `TradePosition`
//! transitions.

use crate::config::ProfileConfig;
use crate::domain::errors::BrokerError;
use crate::domain::events::EngineEvent;
use crate::domain::market::bar::Bar;
use crate::domain::ports::BrokerClient;
use crate::domain::trading::position::{PARTIAL_EXIT_LEVELS, TradePosition};
use crate::domain::trading::types::{
    BracketRequest, OrderPatch, OrderRequest, OrderSide, OrderType, Symbol, TimeInForce,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::journal::Journal;
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Profit thresholds and exit fractions for the three partial-exit levels.
const PARTIAL_EXIT_TRIGGERS: [(u8, Decimal, Decimal); PARTIAL_EXIT_LEVELS as usize] = [
    (0, dec!(0.01), dec!(0.25)),
    (1, dec!(0.02), dec!(0.25)),
    (2, dec!(0.03), dec!(0.25)),
];

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub trailing_stop_pct: Decimal,
    pub partial_exits_enabled: bool,
    pub micro_scaling_enabled: bool,
    /// Limit-entry slippage buffer over the observed price.
    pub slippage_buffer_pct: Decimal,
    /// Fraction of the computed size placed as the initial micro-scaled entry.
    pub initial_entry_fraction: Decimal,
    /// Volatility index level above which add-ons pause.
    pub scale_volatility_threshold: Decimal,
}

impl LifecycleConfig {
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        Self {
            trailing_stop_pct: profile.trailing_stop_pct,
            partial_exits_enabled: profile.partial_exits_enabled,
            micro_scaling_enabled: profile.micro_scaling_enabled,
            slippage_buffer_pct: dec!(0.001),
            initial_entry_fraction: profile.grid_order_size,
            scale_volatility_threshold: profile.grid_volatility_threshold,
        }
    }
}

/// Result of one cycle's exit management for a held position.
#[derive(Debug)]
pub enum CycleOutcome {
    Held(TradePosition),
    Closed { exit_price: Decimal, reason: String },
}

/// Add-on ladder remaining for a micro-scaled position.
#[derive(Debug, Clone)]
struct ScalePlan {
    add_on_quantity: Decimal,
    /// Profit thresholds (fractions) still pending, ascending.
    triggers: Vec<Decimal>,
}

pub struct PositionLifecycle {
    broker: Arc<dyn BrokerClient>,
    journal: Journal,
    events: EventBus,
    profile: String,
    config: LifecycleConfig,
    trade_ids: HashMap<Symbol, i64>,
    scale_plans: HashMap<Symbol, ScalePlan>,
}

impl PositionLifecycle {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        journal: Journal,
        events: EventBus,
        profile: String,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            broker,
            journal,
            events,
            profile,
            config,
            trade_ids: HashMap::new(),
            scale_plans: HashMap::new(),
        }
    }

    /// Place an entry and record the position once the venue accepts it.
    ///
    /// A bracket goes venue-side when supported and the quantity is whole;
    /// otherwise a buffered limit is placed and the stop/target stay
    /// client-side, enforced every cycle by `manage_exits`.
    pub async fn open_position(
        &mut self,
        symbol: &Symbol,
        full_quantity: Decimal,
        price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy: &str,
    ) -> Result<TradePosition> {
        let (entry_quantity, scale_plan) = if self.config.micro_scaling_enabled {
            let initial = full_quantity * self.config.initial_entry_fraction;
            let plan = ScalePlan {
                add_on_quantity: full_quantity * dec!(0.25),
                triggers: vec![dec!(0.005), dec!(0.01)],
            };
            (initial, Some(plan))
        } else {
            (full_quantity, None)
        };

        let limit_price = price * (Decimal::ONE + self.config.slippage_buffer_pct);
        let use_bracket =
            self.broker.supports_brackets() && entry_quantity.fract() == Decimal::ZERO;

        let order_id = if use_bracket {
            self.broker
                .place_bracket(BracketRequest {
                    symbol: symbol.clone(),
                    quantity: entry_quantity,
                    side: OrderSide::Buy,
                    take_profit,
                    stop_loss,
                    limit_price: Some(limit_price),
                })
                .await?
        } else {
            self.broker
                .place_order(OrderRequest {
                    symbol: symbol.clone(),
                    quantity: entry_quantity,
                    side: OrderSide::Buy,
                    order_type: OrderType::Limit,
                    time_in_force: TimeInForce::Gtc,
                    limit_price: Some(limit_price),
                })
                .await?
        };

        // Only now does the position exist: the venue has the order.
        let position = TradePosition::open(
            symbol.clone(),
            price,
            entry_quantity,
            stop_loss,
            take_profit,
            Utc::now(),
            strategy,
        )
        .context("entry accepted but position invariants failed")?;

        let trade_id = self
            .journal
            .record_open(&position, &self.profile)
            .await
            .context("failed to journal position open")?;
        self.trade_ids.insert(symbol.clone(), trade_id);
        if let Some(plan) = scale_plan {
            self.scale_plans.insert(symbol.clone(), plan);
        }

        info!(
            "PositionLifecycle [{}]: opened {} x {} @ {} (order {}, SL {}, TP {}, bracket: {})",
            self.profile, symbol, entry_quantity, price, order_id, stop_loss, take_profit,
            use_bracket
        );
        self.events.publish(EngineEvent::PositionOpened {
            profile: self.profile.clone(),
            symbol: symbol.clone(),
            quantity: entry_quantity,
            entry_price: price,
        });

        Ok(position)
    }

    /// Per-cycle exit management: trailing advance, protective triggers,
    /// partial exits and scale add-ons, in that order. Protective triggers
    /// always run before anything that grows the position.
    pub async fn manage_exits(
        &mut self,
        position: TradePosition,
        bar: &Bar,
        volatility_index: Decimal,
    ) -> Result<CycleOutcome> {
        let price = bar.close;
        let symbol = position.symbol.clone();

        // Trailing stop: only ever rises.
        let advanced = position.with_trailing_advance(price, self.config.trailing_stop_pct);
        if advanced.stop_loss > position.stop_loss {
            self.sync_server_stop(&symbol, advanced.stop_loss).await;
        }
        let position = advanced;

        // Client-side safety triggers for anything the venue is not
        // protecting itself (no bracket support, or fractional size).
        let venue_protected =
            self.broker.supports_brackets() && position.quantity.fract() == Decimal::ZERO;
        if !venue_protected {
            if price <= position.stop_loss {
                return self
                    .exit_at_market(&position, price, "stop loss hit (client-side emergency exit)")
                    .await;
            }
            if price >= position.take_profit {
                return self
                    .exit_at_market(&position, price, "take profit hit (client-side exit)")
                    .await;
            }
        }

        let position = if self.config.partial_exits_enabled {
            self.take_partial_exits(position, price).await?
        } else {
            position
        };

        let position = if self.config.micro_scaling_enabled {
            self.apply_scale_ladder(position, price, volatility_index)
                .await?
        } else {
            position
        };

        Ok(CycleOutcome::Held(position))
    }

    /// Close on a sell signal or operator command: cancel resting orders for
    /// the symbol first so the venue bracket cannot double-fill.
    pub async fn close_position(
        &mut self,
        position: &TradePosition,
        price: Decimal,
        reason: &str,
    ) -> Result<CycleOutcome> {
        if let Err(e) = self.broker.cancel_all(Some(&position.symbol)).await {
            warn!(
                "PositionLifecycle [{}]: cancel before close failed for {}: {}",
                self.profile, position.symbol, e
            );
        }
        self.exit_at_market(position, price, reason).await
    }

    /// The venue reports the position gone (bracket leg filled server-side):
    /// journal the close without placing anything.
    pub async fn reconcile_external_close(
        &mut self,
        position: &TradePosition,
        last_price: Decimal,
    ) -> Result<CycleOutcome> {
        self.finish_close(position, last_price, "venue-side bracket fill")
            .await
    }

    async fn exit_at_market(
        &mut self,
        position: &TradePosition,
        price: Decimal,
        reason: &str,
    ) -> Result<CycleOutcome> {
        self.broker
            .place_order(OrderRequest {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::Ioc,
                limit_price: None,
            })
            .await?;

        self.finish_close(position, price, reason).await
    }

    async fn finish_close(
        &mut self,
        position: &TradePosition,
        price: Decimal,
        reason: &str,
    ) -> Result<CycleOutcome> {
        let pnl = match self.trade_ids.remove(&position.symbol) {
            Some(trade_id) => self
                .journal
                .record_close(trade_id, price, Utc::now().timestamp())
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        "PositionLifecycle [{}]: journal close failed for {}: {}",
                        self.profile, position.symbol, e
                    );
                    position.unrealized_pnl(price)
                }),
            None => position.unrealized_pnl(price),
        };
        self.scale_plans.remove(&position.symbol);

        info!(
            "PositionLifecycle [{}]: closed {} @ {} ({}), P&L {}",
            self.profile, position.symbol, price, reason, pnl
        );
        self.events.publish(EngineEvent::PositionClosed {
            profile: self.profile.clone(),
            symbol: position.symbol.clone(),
            exit_price: price,
            pnl,
            reason: reason.to_string(),
        });

        Ok(CycleOutcome::Closed {
            exit_price: price,
            reason: reason.to_string(),
        })
    }

    /// Fire any pending partial-exit levels. Each level sells its fraction
    /// once; the set-once mask makes re-triggering impossible.
    async fn take_partial_exits(
        &mut self,
        mut position: TradePosition,
        price: Decimal,
    ) -> Result<TradePosition> {
        let profit = position.profit_pct(price);

        for (level, trigger, fraction) in PARTIAL_EXIT_TRIGGERS {
            if position.partial_exits.is_marked(level) || profit < trigger {
                continue;
            }
            let exit_quantity = position.quantity * fraction;
            let Ok(next) = position.with_partial_exit(level, exit_quantity) else {
                continue;
            };

            self.broker
                .place_order(OrderRequest {
                    symbol: position.symbol.clone(),
                    quantity: exit_quantity,
                    side: OrderSide::Sell,
                    order_type: OrderType::Market,
                    time_in_force: TimeInForce::Ioc,
                    limit_price: None,
                })
                .await?;

            info!(
                "PositionLifecycle [{}]: partial exit level {} on {} ({} @ {})",
                self.profile, level, position.symbol, exit_quantity, price
            );
            position = next;
        }

        Ok(position)
    }

    /// Micro-scaling add-ons: 25% of the full size at each profit trigger,
    /// paused while the volatility index is above the configured ceiling.
    async fn apply_scale_ladder(
        &mut self,
        mut position: TradePosition,
        price: Decimal,
        volatility_index: Decimal,
    ) -> Result<TradePosition> {
        let Some(mut plan) = self.scale_plans.get(&position.symbol).cloned() else {
            return Ok(position);
        };
        if volatility_index >= self.config.scale_volatility_threshold {
            return Ok(position);
        }

        let profit = position.profit_pct(price);
        while plan.triggers.first().is_some_and(|t| profit >= *t) {
            plan.triggers.remove(0);
            let quantity = plan.add_on_quantity;

            match self
                .broker
                .place_order(OrderRequest {
                    symbol: position.symbol.clone(),
                    quantity,
                    side: OrderSide::Buy,
                    order_type: OrderType::Market,
                    time_in_force: TimeInForce::Ioc,
                    limit_price: None,
                })
                .await
            {
                Ok(_) => {
                    position = position
                        .with_add_on(quantity, price)
                        .context("add-on accepted but position invariants failed")?;
                    info!(
                        "PositionLifecycle [{}]: scaled into {} (+{} @ {})",
                        self.profile, position.symbol, quantity, price
                    );
                }
                Err(BrokerError::InsufficientFunds { .. }) => {
                    // No buying power for the ladder; drop the rest of it.
                    warn!(
                        "PositionLifecycle [{}]: add-on skipped for {} (insufficient funds)",
                        self.profile, position.symbol
                    );
                    self.scale_plans.remove(&position.symbol);
                    return Ok(position);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if plan.triggers.is_empty() {
            self.scale_plans.remove(&position.symbol);
        } else {
            self.scale_plans.insert(position.symbol.clone(), plan);
        }
        Ok(position)
    }

    /// Push a risen trailing stop to the venue's resting stop order.
    /// Failure is logged and never blocks the client-side protection.
    async fn sync_server_stop(&self, symbol: &Symbol, new_stop: Decimal) {
        let open = match self.broker.open_orders(Some(symbol)).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(
                    "PositionLifecycle [{}]: stop sync skipped for {} (open orders: {})",
                    self.profile, symbol, e
                );
                return;
            }
        };

        let Some(stop_order) = open
            .iter()
            .find(|o| o.side == OrderSide::Sell && o.stop_price.is_some())
        else {
            return;
        };

        let patch = OrderPatch {
            stop_price: Some(new_stop),
            ..OrderPatch::default()
        };
        if let Err(e) = self.broker.replace_order(&stop_order.id, patch).await {
            warn!(
                "PositionLifecycle [{}]: server stop sync failed for {}: {}",
                self.profile, symbol, e
            );
        }
    }
}
