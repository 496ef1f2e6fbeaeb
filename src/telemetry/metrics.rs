//! Prometheus metrics

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Wallet or venue balance
    Balance,
    /// Realized P&L across closed positions
    TotalPnl,
    /// Distance from the P&L peak
    Drawdown,
    /// Open position count
    OpenPositions,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    TradesPlaced,
    TradesSettled,
    ActionsFailed,
    RequestTimeouts,
    Reconnects,
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::Balance => "blitz_balance",
            GaugeMetric::TotalPnl => "blitz_total_pnl",
            GaugeMetric::Drawdown => "blitz_drawdown",
            GaugeMetric::OpenPositions => "blitz_open_positions",
        }
    }
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::TradesPlaced => "blitz_trades_placed_total",
            CounterMetric::TradesSettled => "blitz_trades_settled_total",
            CounterMetric::ActionsFailed => "blitz_actions_failed_total",
            CounterMetric::RequestTimeouts => "blitz_request_timeouts_total",
            CounterMetric::Reconnects => "blitz_reconnects_total",
        }
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Increment a counter by one
pub fn increment(metric: CounterMetric) {
    metrics::counter!(metric.name()).increment(1);
}
