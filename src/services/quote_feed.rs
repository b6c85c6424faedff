use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::errors::TradeError;
use crate::models::Quote;

const QUOTE_IO_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest price for `stock`, fetched on behalf of `username`.
    async fn quote(&self, stock: &str, username: &str) -> Result<Quote, TradeError>;
}

/// Parses a feed reply. Accepts both `price,timestamp,key` and
/// `price,stock,user,timestamp,key`.
pub fn parse_quote(raw: &str, stock: &str, username: &str) -> Result<Quote, TradeError> {
    let fields: Vec<&str> = raw.trim().split(',').map(str::trim).collect();
    if fields.len() < 2 {
        return Err(TradeError::FeedUnavailable(format!("malformed quote {raw:?}")));
    }

    let price_field = fields[0];
    let as_float: f64 = price_field
        .parse()
        .map_err(|_| TradeError::FeedUnavailable(format!("bad price {price_field:?}")))?;
    if !as_float.is_finite() || as_float <= 0.0 {
        return Err(TradeError::FeedUnavailable(format!("non-positive price {price_field:?}")));
    }
    let price = Decimal::from_str(price_field)
        .or_else(|_| Decimal::from_scientific(price_field))
        .map_err(|e| TradeError::FeedUnavailable(format!("bad price {price_field:?}: {e}")))?;

    let ts_field = if fields.len() >= 5 { fields[3] } else { fields[1] };
    let timestamp: i64 = ts_field
        .parse()
        .map_err(|_| TradeError::FeedUnavailable(format!("bad timestamp {ts_field:?}")))?;

    let crypto_key = if fields.len() >= 3 {
        fields[fields.len() - 1].to_string()
    } else {
        String::new()
    };

    Ok(Quote {
        stock: stock.to_string(),
        username: username.to_string(),
        price,
        timestamp,
        crypto_key,
    })
}

/// Client for the line-based quote server: one connection per request,
/// `"<stock>,<username>\n"` out, one comma-separated record back.
#[derive(Debug, Clone)]
pub struct TcpQuoteClient {
    addr: String,
    // 0 = unlimited
    max_attempts: u32,
    retry_delay: Duration,
}

impl TcpQuoteClient {
    pub fn new(addr: String, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            addr,
            max_attempts,
            retry_delay,
        }
    }

    async fn fetch_once(&self, stock: &str, username: &str) -> Result<Quote, TradeError> {
        let io_err = |e: std::io::Error| TradeError::FeedUnavailable(format!("{}: {e}", self.addr));

        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await.map_err(io_err)?;
            stream
                .write_all(format!("{stock},{username}\n").as_bytes())
                .await
                .map_err(io_err)?;

            let mut line = String::new();
            let read = BufReader::new(stream).read_line(&mut line).await.map_err(io_err)?;
            if read == 0 {
                return Err(TradeError::FeedUnavailable("empty reply".to_string()));
            }
            parse_quote(&line, stock, username)
        };

        tokio::time::timeout(QUOTE_IO_TIMEOUT, exchange)
            .await
            .map_err(|_| TradeError::FeedUnavailable(format!("{}: timed out", self.addr)))?
    }
}

#[async_trait]
impl QuoteSource for TcpQuoteClient {
    async fn quote(&self, stock: &str, username: &str) -> Result<Quote, TradeError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(stock, username).await {
                Ok(q) => {
                    tracing::debug!("quote {} = {} (attempt {attempt})", q.stock, q.price);
                    return Ok(q);
                }
                Err(e) => {
                    if self.max_attempts > 0 && attempt >= self.max_attempts {
                        tracing::error!("giving up on quote for {stock} after {attempt} attempts: {e}");
                        return Err(e);
                    }
                    tracing::warn!("quote for {stock} failed (attempt {attempt}), reconnecting: {e}");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }
}

/// In-process price table, for tests and offline runs.
#[derive(Debug, Default)]
pub struct FixedQuoteSource {
    prices: RwLock<HashMap<String, Decimal>>,
    fetches: AtomicU64,
}

impl FixedQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, stock: &str, price: Decimal) -> Self {
        self.set_price(stock, price);
        self
    }

    pub fn set_price(&self, stock: &str, price: Decimal) {
        self.prices.write().insert(stock.to_string(), price);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for FixedQuoteSource {
    async fn quote(&self, stock: &str, username: &str) -> Result<Quote, TradeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let price = self
            .prices
            .read()
            .get(stock)
            .copied()
            .ok_or_else(|| TradeError::FeedUnavailable(format!("no price for {stock}")))?;

        Ok(Quote {
            stock: stock.to_string(),
            username: username.to_string(),
            price,
            timestamp: chrono::Utc::now().timestamp(),
            crypto_key: "fixed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_field_reply() {
        let q = parse_quote("63.511530,1700000000,abcKEY=\n", "AAPL", "user1").unwrap();
        assert_eq!(q.price, Decimal::from_str("63.511530").unwrap());
        assert_eq!(q.timestamp, 1_700_000_000);
        assert_eq!(q.crypto_key, "abcKEY=");
        assert_eq!(q.stock, "AAPL");
    }

    #[test]
    fn parses_five_field_reply() {
        let q = parse_quote("12.50,ABC,user1,1700000001,key", "ABC", "user1").unwrap();
        assert_eq!(q.price, Decimal::from_str("12.50").unwrap());
        assert_eq!(q.timestamp, 1_700_000_001);
        assert_eq!(q.crypto_key, "key");
    }

    #[test]
    fn rejects_bad_prices() {
        assert!(parse_quote("abc,1", "A", "u").is_err());
        assert!(parse_quote("0,1,k", "A", "u").is_err());
        assert!(parse_quote("-3,1,k", "A", "u").is_err());
        assert!(parse_quote("12", "A", "u").is_err());
    }

    #[tokio::test]
    async fn tcp_client_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(sock);
            let mut req = String::new();
            reader.read_line(&mut req).await.unwrap();
            assert_eq!(req, "AAPL,user1\n");
            let mut sock = reader.into_inner();
            sock.write_all(b"101.25,1700000000,k3y").await.unwrap();
        });

        let client = TcpQuoteClient::new(addr.to_string(), 3, Duration::ZERO);
        let q = client.quote("AAPL", "user1").await.unwrap();
        assert_eq!(q.price, Decimal::from_str("101.25").unwrap());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_client_gives_up_after_max_attempts() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TcpQuoteClient::new(addr.to_string(), 2, Duration::from_millis(1));
        let err = client.quote("AAPL", "user1").await.unwrap_err();
        assert!(matches!(err, TradeError::FeedUnavailable(_)));
    }
}
