//! Currency conversion for gateways that charge in another currency.

use std::collections::HashMap;

use domain::Money;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::gateway::GatewayError;

/// Where rates come from and what to use when the source is down.
#[derive(Debug, Clone)]
pub struct ExchangeRateConfig {
    /// Base URL of the rates API, e.g. `https://open.exchangerate-api.com/v6`.
    pub api_base: String,
    /// Currency stored prices are denominated in.
    pub base_currency: String,
    /// Fixed rates keyed by upper-case currency code.
    pub fallback_rates: HashMap<String, Decimal>,
}

impl ExchangeRateConfig {
    pub fn new(api_base: impl Into<String>, base_currency: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            base_currency: base_currency.into().to_uppercase(),
            fallback_rates: HashMap::new(),
        }
    }

    pub fn with_fallback(mut self, currency: &str, rate: Decimal) -> Self {
        self.fallback_rates.insert(currency.to_uppercase(), rate);
        self
    }
}

#[derive(Debug, Deserialize)]
struct LatestRates {
    rates: HashMap<String, Decimal>,
}

/// Fetches exchange rates on demand.
///
/// Rates are not cached; every conversion makes one request.
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    client: reqwest::Client,
    config: ExchangeRateConfig,
}

impl ExchangeRates {
    pub fn new(client: reqwest::Client, config: ExchangeRateConfig) -> Self {
        Self { client, config }
    }

    pub fn base_currency(&self) -> &str {
        &self.config.base_currency
    }

    /// Converts a base-currency amount into `currency`.
    #[tracing::instrument(skip(self), fields(base = %self.config.base_currency))]
    pub async fn convert(&self, amount: Money, currency: &str) -> Result<Money, GatewayError> {
        let rate = self.rate(currency).await?;
        amount
            .convert(rate)
            .ok_or_else(|| GatewayError::Rejected(format!("amount {amount} cannot be converted")))
    }

    /// Returns units of `currency` per unit of the base currency.
    ///
    /// Falls back to the configured fixed rate when the API cannot be reached
    /// or does not list the currency.
    pub async fn rate(&self, currency: &str) -> Result<Decimal, GatewayError> {
        let target = currency.to_uppercase();
        if target == self.config.base_currency {
            return Ok(Decimal::ONE);
        }

        match self.fetch(&target).await {
            Ok(rate) => Ok(rate),
            Err(err) => match self.config.fallback_rates.get(&target) {
                Some(rate) => {
                    tracing::warn!(
                        currency = %target,
                        %rate,
                        error = %err,
                        "exchange rate unavailable, charging at fallback rate"
                    );
                    metrics::counter!("exchange_rate_fallback_total", "currency" => target)
                        .increment(1);
                    Ok(*rate)
                }
                None => Err(err),
            },
        }
    }

    async fn fetch(&self, target: &str) -> Result<Decimal, GatewayError> {
        let url = format!(
            "{}/latest/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.base_currency
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "exchange rate API returned {}",
                response.status()
            )));
        }

        let latest: LatestRates = response.json().await?;
        latest
            .rates
            .get(target)
            .copied()
            .filter(|rate| rate.is_sign_positive() && !rate.is_zero())
            .ok_or_else(|| GatewayError::Unavailable(format!("no exchange rate for {target}")))
    }
}
