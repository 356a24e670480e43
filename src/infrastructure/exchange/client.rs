//! Signed REST client for the exchange.
//!
//! Every private call goes out as a signed envelope; responses come back as
//! `{code, message, result}` and non-zero codes map to the typed
//! [`ExchangeError`] taxonomy. Transient transport failures retry inside the
//! HTTP middleware; the circuit breaker stops a broken endpoint from being
//! hammered across cycles.

use crate::domain::errors::{ExchangeError, truncate_snippet};
use crate::domain::ports::{CreateOrderRequest, ExchangeClient, ExchangeOrderAck, ExchangeOrderView};
use crate::domain::types::{Balance, Instrument};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::exchange::types::{
    AccountSummaryResult, ApiRequest, ApiResponse, CreateOrderParams, CreateOrderResult,
    InstrumentsResult, OrderDetailResult, OrderListResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub struct RestExchangeClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    request_deadline: Duration,
    request_id: AtomicU64,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl RestExchangeClient {
    pub fn new(
        api_key: String,
        api_secret: String,
        base_url: String,
        request_deadline: Duration,
    ) -> Self {
        let client = HttpClientFactory::create_client(request_deadline);
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            "Exchange",
            5,
            2,
            Duration::from_secs(60),
        ));

        Self {
            client,
            api_key,
            api_secret,
            base_url,
            request_deadline,
            request_id: AtomicU64::new(1),
            circuit_breaker,
        }
    }

    /// Generate the HMAC-SHA256 signature over
    /// `method + id + api_key + params + nonce`.
    fn sign_request(&self, method: &str, id: u64, params_sig: &str, nonce: i64) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let payload = format!("{}{}{}{}{}", method, id, self.api_key, params_sig, nonce);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Flatten params into the signature string: keys sorted, `key` then
    /// rendered value, recursively.
    fn params_signature_string(value: &serde_json::Value) -> String {
        fn render(value: &serde_json::Value, out: &mut String) {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                serde_json::Value::Number(n) => out.push_str(&n.to_string()),
                serde_json::Value::String(s) => out.push_str(s),
                serde_json::Value::Array(items) => {
                    for item in items {
                        render(item, out);
                    }
                }
                serde_json::Value::Object(map) => {
                    let mut keys: Vec<_> = map.keys().collect();
                    keys.sort();
                    for key in keys {
                        out.push_str(key);
                        render(&map[key], out);
                    }
                }
            }
        }

        let mut out = String::new();
        render(value, &mut out);
        out
    }

    async fn post<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Option<T>, ExchangeError> {
        self.circuit_breaker
            .check()
            .await
            .map_err(ExchangeError::Unavailable)?;

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let nonce = Utc::now().timestamp_millis();
        let params_value =
            serde_json::to_value(&params).map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let sig = self.sign_request(
            method,
            id,
            &Self::params_signature_string(&params_value),
            nonce,
        );

        let envelope = ApiRequest {
            id,
            method: method.to_string(),
            api_key: self.api_key.clone(),
            params: params_value,
            nonce,
            sig,
        };

        let url = format!("{}/{}", self.base_url, method);
        debug!("Exchange request {} (id {})", method, id);

        let response = self.client.post(&url).json(&envelope).send().await;
        self.finish(method, response).await
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        method: &str,
    ) -> Result<Option<T>, ExchangeError> {
        self.circuit_breaker
            .check()
            .await
            .map_err(ExchangeError::Unavailable)?;

        let url = format!("{}/{}", self.base_url, method);
        let response = self.client.get(&url).send().await;
        self.finish(method, response).await
    }

    async fn finish<T: DeserializeOwned>(
        &self,
        method: &str,
        response: Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Result<Option<T>, ExchangeError> {
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.circuit_breaker.record_failure().await;
                return Err(self.map_transport_error(e));
            }
        };

        let status = response.status();
        let raw = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                self.circuit_breaker.record_failure().await;
                return Err(ExchangeError::Transport(e.to_string()));
            }
        };

        if status.as_u16() == 429 {
            self.circuit_breaker.record_failure().await;
            return Err(ExchangeError::RateLimited { code: 429 });
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure().await;
            return Err(ExchangeError::Transport(format!(
                "{} returned {}: {}",
                method,
                status,
                truncate_snippet(&raw)
            )));
        }

        // The endpoint answered; transport is healthy even if the call is
        // rejected at the application level.
        self.circuit_breaker.record_success().await;

        let parsed: ApiResponse<T> = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(_) if status.as_u16() == 401 => {
                return Err(ExchangeError::Authentication { code: 401 });
            }
            Err(e) => {
                return Err(ExchangeError::Transport(format!(
                    "unparseable response from {}: {} ({})",
                    method,
                    truncate_snippet(&raw),
                    e
                )));
            }
        };

        if parsed.code != 0 {
            let detail = parsed.message.unwrap_or(raw);
            warn!(
                "Exchange {} rejected: code {} ({})",
                method,
                parsed.code,
                truncate_snippet(&detail)
            );
            return Err(ExchangeError::from_code(parsed.code, &detail));
        }

        // Some write endpoints (cancel-order) acknowledge with a bare
        // code 0; callers that need a payload unwrap it themselves.
        Ok(parsed.result)
    }

    fn missing_result(method: &str) -> ExchangeError {
        ExchangeError::Transport(format!("{} returned code 0 without a result", method))
    }

    fn map_transport_error(&self, e: reqwest_middleware::Error) -> ExchangeError {
        match e {
            reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => {
                ExchangeError::Timeout(self.request_deadline)
            }
            other => ExchangeError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    async fn get_instruments(&self) -> Result<Vec<Instrument>, ExchangeError> {
        let result: InstrumentsResult = self
            .get_public("public/get-instruments")
            .await?
            .ok_or_else(|| Self::missing_result("public/get-instruments"))?;
        result
            .instruments
            .into_iter()
            .map(|dto| dto.into_domain())
            .collect()
    }

    async fn get_account_summary(&self) -> Result<Vec<Balance>, ExchangeError> {
        let result: AccountSummaryResult = self
            .post("private/get-account-summary", serde_json::json!({}))
            .await?
            .ok_or_else(|| Self::missing_result("private/get-account-summary"))?;

        result
            .accounts
            .into_iter()
            .map(|a| {
                let total = rust_decimal::Decimal::from_str(&a.balance);
                let available = rust_decimal::Decimal::from_str(&a.available);
                let reserved = rust_decimal::Decimal::from_str(&a.order);
                match (total, available, reserved) {
                    (Ok(total), Ok(available), Ok(reserved)) => Ok(Balance {
                        asset: a.currency,
                        total,
                        available,
                        reserved,
                    }),
                    _ => Err(ExchangeError::Transport(format!(
                        "unparseable balance for {}",
                        a.currency
                    ))),
                }
            })
            .collect()
    }

    async fn get_open_orders(&self) -> Result<Vec<ExchangeOrderView>, ExchangeError> {
        let result: OrderListResult = self
            .post("private/get-open-orders", serde_json::json!({}))
            .await?
            .ok_or_else(|| Self::missing_result("private/get-open-orders"))?;
        result
            .order_list
            .into_iter()
            .map(|dto| dto.into_view())
            .collect()
    }

    async fn get_order_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExchangeOrderView>, ExchangeError> {
        let result: OrderListResult = self
            .post(
                "private/get-order-history",
                serde_json::json!({ "start_ts": since.timestamp_millis() }),
            )
            .await?
            .ok_or_else(|| Self::missing_result("private/get-order-history"))?;
        result
            .order_list
            .into_iter()
            .map(|dto| dto.into_view())
            .collect()
    }

    async fn get_order_detail(
        &self,
        exchange_order_id: &str,
    ) -> Result<ExchangeOrderView, ExchangeError> {
        let result: OrderDetailResult = self
            .post(
                "private/get-order-detail",
                serde_json::json!({ "order_id": exchange_order_id }),
            )
            .await?
            .ok_or_else(|| Self::missing_result("private/get-order-detail"))?;
        result.order_info.into_view()
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<ExchangeOrderAck, ExchangeError> {
        let params = CreateOrderParams {
            instrument_name: request.symbol.clone(),
            side: request.side.to_string(),
            order_type: request.order_type.to_string(),
            quantity: request.quantity.clone(),
            price: request.price.clone(),
            trigger_price: request.trigger_price.clone(),
            trigger_condition: request.trigger_condition.clone(),
            client_oid: request.client_oid.clone(),
            exec_inst: request.exec_inst.clone(),
            leverage: request.leverage,
        };

        let result: CreateOrderResult = self
            .post("private/create-order", params)
            .await?
            .ok_or_else(|| Self::missing_result("private/create-order"))?;
        Ok(ExchangeOrderAck {
            exchange_order_id: result.order_id,
            client_oid: result.client_oid,
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<(), ExchangeError> {
        let _: Option<serde_json::Value> = self
            .post(
                "private/cancel-order",
                serde_json::json!({
                    "instrument_name": symbol,
                    "order_id": exchange_order_id,
                }),
            )
            .await?;
        Ok(())
    }
}
