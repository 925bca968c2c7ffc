//! Business logic: intent lifecycle, amount disambiguation, exchange rates,
//! pay-address resolution, and webhook dispatch.

pub mod amount;
pub mod exchange_rate;
pub mod intent_service;
pub mod pay_address;
pub mod webhook;

pub use amount::AmountDisambiguator;
pub use exchange_rate::ExchangeRateService;
pub use intent_service::IntentService;
pub use pay_address::PayAddressResolver;
pub use webhook::WebhookDispatcher;
