//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use settlement::{ExchangeRateConfig, HostedRedirectConfig, PaymentIntentConfig};

pub const DEFAULT_EXCHANGE_RATE_API_BASE: &str = "https://open.exchangerate-api.com/v6";

/// Built-in fallback rates from USD, covering the gateways' default
/// currencies. `FALLBACK_EXCHANGE_RATES` entries override these.
pub const DEFAULT_USD_FALLBACK_RATES: &str = "BDT=110";

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (and a `.env` file, if present):
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for plain text
/// - `DATABASE_URL`: PostgreSQL connection string; absent means in-memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `BASE_URL`: public URL used to build provider callback URLs
/// - `BASE_CURRENCY`: currency of stored prices (default `USD`)
/// - `GATEWAY_TIMEOUT_SECS`: outbound provider timeout (default 10)
/// - `SSLC_STORE_ID`, `SSLC_STORE_PASS`, `SSLC_IS_SANDBOX`, `SSLC_API_BASE`
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_API_BASE`, `STRIPE_CURRENCY`
/// - `EXCHANGE_RATE_API_BASE`, `FALLBACK_EXCHANGE_RATES` (`BDT=110,EUR=0.9`),
///   merged over the built-in USD rates when the base currency is USD
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub base_url: String,
    pub base_currency: String,
    pub gateway_timeout: Duration,
    pub sslcommerz: Option<SslcommerzSettings>,
    pub stripe: Option<StripeSettings>,
    pub exchange_rate_api_base: String,
    pub fallback_exchange_rates: HashMap<String, Decimal>,
}

#[derive(Debug, Clone)]
pub struct SslcommerzSettings {
    pub store_id: String,
    pub store_pass: String,
    pub is_sandbox: bool,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: Option<String>,
    pub currency: Option<String>,
}

impl Config {
    /// Loads configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let sslcommerz = match (var("SSLC_STORE_ID"), var("SSLC_STORE_PASS")) {
            (Some(store_id), Some(store_pass)) => Some(SslcommerzSettings {
                store_id,
                store_pass,
                is_sandbox: var("SSLC_IS_SANDBOX").is_none_or(|v| parse_flag(&v)),
                api_base: var("SSLC_API_BASE"),
            }),
            _ => None,
        };

        let stripe = match (var("STRIPE_SECRET_KEY"), var("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeSettings {
                secret_key,
                webhook_secret,
                api_base: var("STRIPE_API_BASE"),
                currency: var("STRIPE_CURRENCY"),
            }),
            _ => None,
        };

        let base_currency = var("BASE_CURRENCY")
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or(defaults.base_currency);
        let mut fallback_exchange_rates = default_fallback_rates(&base_currency);
        if let Some(v) = var("FALLBACK_EXCHANGE_RATES") {
            fallback_exchange_rates.extend(parse_rates(&v));
        }

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed::<u16>(&var, "PORT").unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed::<u32>(&var, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            base_url: var("BASE_URL").unwrap_or(defaults.base_url),
            base_currency,
            gateway_timeout: parsed::<u64>(&var, "GATEWAY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.gateway_timeout),
            sslcommerz,
            stripe,
            exchange_rate_api_base: var("EXCHANGE_RATE_API_BASE")
                .unwrap_or(defaults.exchange_rate_api_base),
            fallback_exchange_rates,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn exchange_rate_config(&self) -> ExchangeRateConfig {
        self.fallback_exchange_rates.iter().fold(
            ExchangeRateConfig::new(&self.exchange_rate_api_base, &self.base_currency),
            |config, (currency, rate)| config.with_fallback(currency, *rate),
        )
    }

    /// Hosted-redirect gateway settings, if its credentials are configured.
    pub fn hosted_redirect_config(&self) -> Option<HostedRedirectConfig> {
        let settings = self.sslcommerz.as_ref()?;
        let mut config = HostedRedirectConfig::new(
            &settings.store_id,
            &settings.store_pass,
            settings.is_sandbox,
            &self.base_url,
        );
        if let Some(api_base) = &settings.api_base {
            config.api_base = api_base.clone();
        }
        Some(config)
    }

    /// Payment-intent gateway settings, if its credentials are configured.
    pub fn payment_intent_config(&self) -> Option<PaymentIntentConfig> {
        let settings = self.stripe.as_ref()?;
        let mut config = PaymentIntentConfig::new(&settings.secret_key, &settings.webhook_secret);
        if let Some(api_base) = &settings.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(currency) = &settings.currency {
            config.currency = currency.to_ascii_lowercase();
        }
        Some(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            base_url: "http://localhost:3000".to_string(),
            base_currency: "USD".to_string(),
            gateway_timeout: Duration::from_secs(10),
            sslcommerz: None,
            stripe: None,
            exchange_rate_api_base: DEFAULT_EXCHANGE_RATE_API_BASE.to_string(),
            fallback_exchange_rates: default_fallback_rates("USD"),
        }
    }
}

fn default_fallback_rates(base_currency: &str) -> HashMap<String, Decimal> {
    if base_currency == "USD" {
        parse_rates(DEFAULT_USD_FALLBACK_RATES)
    } else {
        HashMap::new()
    }
}

fn parsed<T: FromStr>(var: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses `CUR=rate` pairs separated by commas. Malformed pairs are skipped.
fn parse_rates(value: &str) -> HashMap<String, Decimal> {
    value
        .split(',')
        .filter_map(|pair| {
            let (currency, rate) = pair.split_once('=')?;
            let currency = currency.trim();
            if currency.is_empty() {
                return None;
            }
            let rate = Decimal::from_str(rate.trim()).ok()?;
            Some((currency.to_ascii_uppercase(), rate))
        })
        .collect()
}
