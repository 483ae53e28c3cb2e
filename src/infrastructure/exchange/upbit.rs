//! Upbit REST adapter implementing the exchange gateway contract: order
//! placement and cancellation, fills, balances, tickers and orderbooks.
//! Requests are authorized with an HS256 JWT carrying a SHA-512 hash of the
//! query string.

use crate::domain::exchange::{
    Balance, ExchangeError, ExchangeOrder, ExchangeSide, Orderbook, OrderbookUnit, OrderState,
};
use crate::domain::market::Market;
use crate::domain::ports::ExchangeGateway;
use crate::infrastructure::exchange::http::{create_client, encode_query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::Method;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Exchange error names that mean the market itself is unavailable. These are
/// surfaced as `MarketSuspended` so strategies can blacklist the market.
const MARKET_UNAVAILABLE_ERRORS: &[&str] = &[
    "market_does_not_exist",
    "invalid_market",
    "market_suspended",
    "trading_suspended",
];

#[derive(Serialize)]
struct AuthClaims {
    access_key: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<&'static str>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    name: serde_json::Value,
    message: String,
}

#[derive(Deserialize)]
struct OrderDto {
    uuid: String,
    side: String,
    state: String,
    market: String,
    created_at: String,
    price: Option<String>,
    volume: Option<String>,
    executed_volume: Option<String>,
    locked: Option<String>,
    paid_fee: Option<String>,
}

#[derive(Deserialize)]
struct AccountDto {
    currency: String,
    balance: String,
    locked: String,
    avg_buy_price: String,
}

#[derive(Deserialize)]
struct TickerDto {
    trade_price: Decimal,
}

#[derive(Deserialize)]
struct OrderbookUnitDto {
    ask_price: Decimal,
    bid_price: Decimal,
    ask_size: Decimal,
    bid_size: Decimal,
}

#[derive(Deserialize)]
struct OrderbookDto {
    orderbook_units: Vec<OrderbookUnitDto>,
}

pub struct UpbitGateway {
    client: ClientWithMiddleware,
    access_key: String,
    secret_key: String,
    base_url: String,
}

impl UpbitGateway {
    pub fn new(
        access_key: String,
        secret_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: create_client(timeout),
            access_key,
            secret_key,
            base_url,
        }
    }

    /// Build the bearer token for a request. A query hash is included exactly
    /// when the request carries parameters.
    fn authorization(&self, query: Option<&str>) -> Result<String, ExchangeError> {
        let (query_hash, query_hash_alg) = match query {
            Some(q) if !q.is_empty() => {
                let mut hasher = Sha512::new();
                hasher.update(q.as_bytes());
                (Some(hex::encode(hasher.finalize())), Some("SHA512"))
            }
            _ => (None, None),
        };

        let claims = AuthClaims {
            access_key: self.access_key.clone(),
            nonce: Uuid::new_v4().to_string(),
            query_hash,
            query_hash_alg,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )
        .map_err(|e| ExchangeError::Transport(format!("jwt signing failed: {}", e)))?;
        Ok(format!("Bearer {}", token))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = encode_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let auth = self.authorization(Some(&query))?;

        debug!("UpbitGateway: {} {}", method, path);
        let response = self
            .client
            .request(method, &url)
            .header("Authorization", auth)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| match e {
                reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => {
                    ExchangeError::Timeout(Duration::from_secs(10))
                }
                other => ExchangeError::Transport(other.to_string()),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_api_error(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ExchangeError::Decode(e.to_string()))
    }

    fn map_api_error(&self, status: u16, body: &str) -> ExchangeError {
        let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
        let (name, message) = match parsed {
            Some(b) => (
                b.error
                    .name
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| b.error.name.to_string()),
                b.error.message,
            ),
            None => (format!("http_{}", status), body.to_string()),
        };

        if MARKET_UNAVAILABLE_ERRORS.contains(&name.as_str()) {
            // The caller knows which market it was talking about; a parse
            // failure here would only hide the suspension.
            if let Ok(market) = Market::parse(extract_market_hint(&message).unwrap_or("KRW-NONE")) {
                return ExchangeError::MarketSuspended(market);
            }
        }

        warn!("UpbitGateway: api error [{}] {}", name, message);
        ExchangeError::Api {
            code: name,
            message,
        }
    }

    async fn submit_order(
        &self,
        params: Vec<(&'static str, String)>,
        market: &Market,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let dto: OrderDto = self.request(Method::POST, "/v1/orders", &params).await?;
        dto_to_order(dto).map_err(|e| {
            warn!("UpbitGateway [{}]: malformed order response: {}", market, e);
            ExchangeError::Decode(e)
        })
    }
}

fn extract_market_hint(message: &str) -> Option<&str> {
    message.split_whitespace().find(|w| w.contains('-'))
}

fn parse_decimal(value: &Option<String>) -> Decimal {
    value
        .as_deref()
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO)
}

fn dto_to_order(dto: OrderDto) -> Result<ExchangeOrder, String> {
    let market = Market::parse(&dto.market).map_err(|e| e.to_string())?;
    let side = match dto.side.as_str() {
        "bid" => ExchangeSide::Bid,
        "ask" => ExchangeSide::Ask,
        other => return Err(format!("unknown order side '{}'", other)),
    };
    let state = match dto.state.as_str() {
        "done" => OrderState::Done,
        "wait" | "watch" => OrderState::Wait,
        "cancel" => OrderState::Cancel,
        other => return Err(format!("unknown order state '{}'", other)),
    };
    let created_at = DateTime::parse_from_rfc3339(&dto.created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad created_at: {}", e))?;

    Ok(ExchangeOrder {
        uuid: dto.uuid,
        market,
        side,
        state,
        price: dto.price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        volume: dto.volume.as_deref().and_then(|v| Decimal::from_str(v).ok()),
        executed_volume: parse_decimal(&dto.executed_volume),
        locked: parse_decimal(&dto.locked),
        paid_fee: parse_decimal(&dto.paid_fee),
        created_at,
    })
}

#[async_trait]
impl ExchangeGateway for UpbitGateway {
    async fn buy_market_order(
        &self,
        market: &Market,
        krw_notional: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        // Notional-funded market buy: ord_type=price carries KRW in `price`.
        let params = vec![
            ("market", market.as_str().to_string()),
            ("side", "bid".to_string()),
            ("ord_type", "price".to_string()),
            ("price", krw_notional.to_string()),
        ];
        self.submit_order(params, market).await
    }

    async fn sell_market_order(
        &self,
        market: &Market,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let params = vec![
            ("market", market.as_str().to_string()),
            ("side", "ask".to_string()),
            ("ord_type", "market".to_string()),
            ("volume", quantity.to_string()),
        ];
        self.submit_order(params, market).await
    }

    async fn buy_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let params = vec![
            ("market", market.as_str().to_string()),
            ("side", "bid".to_string()),
            ("ord_type", "limit".to_string()),
            ("price", price.to_string()),
            ("volume", quantity.to_string()),
        ];
        self.submit_order(params, market).await
    }

    async fn sell_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let params = vec![
            ("market", market.as_str().to_string()),
            ("side", "ask".to_string()),
            ("ord_type", "limit".to_string()),
            ("price", price.to_string()),
            ("volume", quantity.to_string()),
        ];
        self.submit_order(params, market).await
    }

    async fn get_order(&self, uuid: &str) -> Result<Option<ExchangeOrder>, ExchangeError> {
        let params = vec![("uuid", uuid.to_string())];
        match self
            .request::<OrderDto>(Method::GET, "/v1/order", &params)
            .await
        {
            Ok(dto) => dto_to_order(dto).map(Some).map_err(ExchangeError::Decode),
            Err(ExchangeError::Api { code, .. }) if code.contains("not_found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn cancel_order(&self, uuid: &str) -> Result<(), ExchangeError> {
        let params = vec![("uuid", uuid.to_string())];
        self.request::<serde_json::Value>(Method::DELETE, "/v1/order", &params)
            .await
            .map(|_| ())
    }

    async fn get_orders(
        &self,
        market: Option<&Market>,
        state: OrderState,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let mut params = vec![
            ("state", state.to_string()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
            ("order_by", "desc".to_string()),
        ];
        if let Some(market) = market {
            params.insert(0, ("market", market.as_str().to_string()));
        }
        let dtos: Vec<OrderDto> = self.request(Method::GET, "/v1/orders", &params).await?;
        let mut orders = Vec::with_capacity(dtos.len());
        for dto in dtos {
            match dto_to_order(dto) {
                Ok(order) => orders.push(order),
                Err(e) => warn!("UpbitGateway: skipping malformed order in list: {}", e),
            }
        }
        Ok(orders)
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let dtos: Vec<AccountDto> = self.request(Method::GET, "/v1/accounts", &[]).await?;
        Ok(dtos
            .into_iter()
            .map(|dto| Balance {
                currency: dto.currency,
                balance: Decimal::from_str(&dto.balance).unwrap_or(Decimal::ZERO),
                locked: Decimal::from_str(&dto.locked).unwrap_or(Decimal::ZERO),
                avg_buy_price: Decimal::from_str(&dto.avg_buy_price).unwrap_or(Decimal::ZERO),
            })
            .collect())
    }

    async fn get_current_price(&self, market: &Market) -> Result<Decimal, ExchangeError> {
        let params = vec![("markets", market.as_str().to_string())];
        let tickers: Vec<TickerDto> = self.request(Method::GET, "/v1/ticker", &params).await?;
        tickers
            .first()
            .map(|t| t.trade_price)
            .ok_or_else(|| ExchangeError::Decode(format!("empty ticker for {}", market)))
    }

    async fn get_orderbook(&self, market: &Market) -> Result<Orderbook, ExchangeError> {
        let params = vec![("markets", market.as_str().to_string())];
        let books: Vec<OrderbookDto> = self.request(Method::GET, "/v1/orderbook", &params).await?;
        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("empty orderbook for {}", market)))?;
        Ok(Orderbook {
            market: market.clone(),
            units: book
                .orderbook_units
                .into_iter()
                .map(|u| OrderbookUnit {
                    ask_price: u.ask_price,
                    bid_price: u.bid_price,
                    ask_size: u.ask_size,
                    bid_size: u.bid_size,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dto_to_order_parses_settlement_fields() {
        let dto = OrderDto {
            uuid: "u-1".to_string(),
            side: "bid".to_string(),
            state: "done".to_string(),
            market: "KRW-BTC".to_string(),
            created_at: "2025-11-03T10:00:00+09:00".to_string(),
            price: None,
            volume: None,
            executed_volume: Some("0.0001".to_string()),
            locked: Some("10000".to_string()),
            paid_fee: Some("4".to_string()),
        };
        let order = dto_to_order(dto).unwrap();
        assert_eq!(order.state, OrderState::Done);
        assert_eq!(order.side, ExchangeSide::Bid);
        assert_eq!(order.executed_volume, Decimal::from_str("0.0001").unwrap());
        assert_eq!(order.locked, Decimal::from(10000));
        // KST 10:00 is 01:00 UTC
        assert_eq!(order.created_at.to_rfc3339(), "2025-11-03T01:00:00+00:00");
    }

    #[test]
    fn test_dto_rejects_unknown_state() {
        let dto = OrderDto {
            uuid: "u-1".to_string(),
            side: "bid".to_string(),
            state: "limbo".to_string(),
            market: "KRW-BTC".to_string(),
            created_at: "2025-11-03T10:00:00+09:00".to_string(),
            price: None,
            volume: None,
            executed_volume: None,
            locked: None,
            paid_fee: None,
        };
        assert!(dto_to_order(dto).is_err());
    }

    #[test]
    fn test_market_unavailable_maps_to_suspension() {
        let gateway = UpbitGateway::new(
            "ak".to_string(),
            "sk".to_string(),
            "https://api.example".to_string(),
            Duration::from_secs(5),
        );
        let err = gateway.map_api_error(
            400,
            r#"{"error":{"name":"market_does_not_exist","message":"KRW-DELISTED market not found"}}"#,
        );
        assert!(err.is_market_suspended());

        let err = gateway.map_api_error(
            400,
            r#"{"error":{"name":"insufficient_funds_bid","message":"not enough KRW"}}"#,
        );
        assert!(!err.is_market_suspended());
    }
}
