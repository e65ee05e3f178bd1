//! Mock Plaid API server for testing
//!
//! A small threaded HTTP server answering the Plaid endpoints the adapter
//! uses, so the adapter can be exercised end to end without a Plaid account:
//! - POST /item/public_token/exchange returns { access_token, item_id }
//! - POST /accounts/get returns { accounts: [...] }
//! - POST /transactions/get honours options.count / options.offset
//! - POST /item/public_token/create and update-mode /link/token/create
//! - POST /accounts/balance/get returns live balances
//! - POST /asset_report/* answers PRODUCT_NOT_READY a configurable number of times

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use serde_json::{json, Value as JsonValue};

/// Mock Plaid server for testing
pub struct MockPlaidServer {
    port: u16,
    running: Arc<AtomicBool>,
    report_gets: Arc<AtomicUsize>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

/// Configuration for mock data generation
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub num_accounts: usize,
    pub num_transactions: usize,
    /// Reject every request with INVALID_API_KEYS
    pub fail_auth: bool,
    /// Answer data endpoints with ITEM_LOGIN_REQUIRED
    pub login_required: bool,
    pub rate_limit: bool,
    /// Number of PRODUCT_NOT_READY answers before the report is ready
    pub report_not_ready: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            num_accounts: 3,
            num_transactions: 50,
            fail_auth: false,
            login_required: false,
            rate_limit: false,
            report_not_ready: 0,
        }
    }
}

/// The PDF bytes served by /asset_report/pdf/get
pub const MOCK_PDF: &[u8] = b"%PDF-1.4 mock asset report";

struct Request {
    path: String,
    headers: String,
    body: JsonValue,
}

impl MockPlaidServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let report_gets = Arc::new(AtomicUsize::new(0));

        // Non-blocking accept so stop() can end the loop
        listener.set_nonblocking(true)?;

        let running_clone = running.clone();
        let gets_clone = report_gets.clone();
        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let gets = gets_clone.clone();
                        thread::spawn(move || {
                            handle_connection(stream, &cfg, &gets);
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            report_gets,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// How many /asset_report/get calls the server has answered
    pub fn report_get_calls(&self) -> usize {
        self.report_gets.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockPlaidServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    // Accepted sockets inherit non-blocking mode on some platforms
    stream.set_nonblocking(false).ok()?;
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();

    let mut headers = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let lower = line.to_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        headers.push_str(&lower);
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    let body = serde_json::from_slice(&body).unwrap_or(JsonValue::Null);

    Some(Request {
        path,
        headers,
        body,
    })
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig, report_gets: &AtomicUsize) {
    let Some(request) = read_request(&mut stream) else {
        return;
    };

    if config.fail_auth || !request.headers.contains("plaid-client-id: test_") {
        send_error(&mut stream, 400, "INVALID_REQUEST", "INVALID_API_KEYS", "invalid client_id or secret provided");
        return;
    }
    if config.rate_limit {
        send_error(&mut stream, 429, "RATE_LIMIT_EXCEEDED", "RATE_LIMIT", "rate limit exceeded");
        return;
    }

    let access_token = request.body["access_token"].as_str().unwrap_or("");
    let needs_item = matches!(
        request.path.as_str(),
        "/accounts/get"
            | "/accounts/balance/get"
            | "/transactions/get"
            | "/item/get"
            | "/item/public_token/create"
    );
    if needs_item && config.login_required {
        send_error(&mut stream, 400, "ITEM_ERROR", "ITEM_LOGIN_REQUIRED", "the login details of this item have changed");
        return;
    }
    if needs_item && !access_token.starts_with("access-sandbox-") {
        send_error(&mut stream, 400, "INVALID_INPUT", "INVALID_ACCESS_TOKEN", "provided access token is in an invalid format");
        return;
    }

    match request.path.as_str() {
        "/item/public_token/exchange" => {
            let public_token = request.body["public_token"].as_str().unwrap_or("");
            match public_token.strip_prefix("public-sandbox-") {
                Some(suffix) => send_json(
                    &mut stream,
                    json!({
                        "access_token": format!("access-sandbox-{}", suffix),
                        "item_id": format!("item-{}", suffix),
                        "request_id": "req",
                    }),
                ),
                None => send_error(&mut stream, 400, "INVALID_INPUT", "INVALID_PUBLIC_TOKEN", "provided public token is in an invalid format"),
            }
        }
        "/link/token/create" => {
            let update_mode = request.body.get("access_token").is_some();
            let has_products = request.body.get("products").is_some();
            if update_mode && has_products {
                send_error(&mut stream, 400, "INVALID_REQUEST", "INVALID_FIELD", "products must not be specified in update mode");
            } else if !update_mode && !has_products {
                send_error(&mut stream, 400, "INVALID_REQUEST", "MISSING_FIELDS", "products is required");
            } else {
                send_json(
                    &mut stream,
                    json!({
                        "link_token": if update_mode { "link-sandbox-update" } else { "link-sandbox-mock" },
                        "expiration": "2030-01-01T00:00:00Z",
                    }),
                )
            }
        }
        "/item/public_token/create" => {
            let suffix = access_token.trim_start_matches("access-sandbox-");
            send_json(
                &mut stream,
                json!({ "public_token": format!("public-sandbox-{}", suffix) }),
            )
        }
        "/item/get" => send_json(
            &mut stream,
            json!({ "item": { "item_id": "item-mock", "institution_id": "ins_109508" } }),
        ),
        "/institutions/get_by_id" => send_json(
            &mut stream,
            json!({ "institution": { "institution_id": "ins_109508", "name": "First Platypus Bank" } }),
        ),
        "/accounts/get" | "/accounts/balance/get" => send_json(
            &mut stream,
            json!({ "accounts": generate_accounts(config.num_accounts) }),
        ),
        "/transactions/get" => {
            let count = request.body["options"]["count"].as_u64().unwrap_or(100) as usize;
            let offset = request.body["options"]["offset"].as_u64().unwrap_or(0) as usize;
            let page: Vec<JsonValue> = (offset..config.num_transactions.min(offset + count))
                .map(generate_transaction)
                .collect();
            send_json(
                &mut stream,
                json!({
                    "accounts": [],
                    "transactions": page,
                    "total_transactions": config.num_transactions,
                }),
            )
        }
        "/asset_report/create" => send_json(
            &mut stream,
            json!({
                "asset_report_token": "assets-sandbox-mock",
                "asset_report_id": "report-mock",
            }),
        ),
        "/asset_report/get" => {
            let call = report_gets.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= config.report_not_ready {
                send_error(&mut stream, 400, "ASSET_REPORT_ERROR", "PRODUCT_NOT_READY", "the requested product is not yet ready");
            } else {
                send_json(
                    &mut stream,
                    json!({ "report": { "asset_report_id": "report-mock", "items": [] }, "warnings": [] }),
                )
            }
        }
        "/asset_report/pdf/get" => send_bytes(&mut stream, "application/pdf", MOCK_PDF),
        _ => send_error(&mut stream, 404, "INVALID_REQUEST", "NOT_FOUND", "endpoint not found"),
    }
}

fn send_json(stream: &mut TcpStream, body: JsonValue) {
    send_bytes(stream, "application/json", body.to_string().as_bytes());
}

fn send_error(stream: &mut TcpStream, status: u16, error_type: &str, error_code: &str, message: &str) {
    let body = json!({
        "error_type": error_type,
        "error_code": error_code,
        "error_message": message,
        "display_message": null,
    })
    .to_string();
    send_response(stream, status, "application/json", body.as_bytes());
}

fn send_bytes(stream: &mut TcpStream, content_type: &str, body: &[u8]) {
    send_response(stream, 200, content_type, body);
}

fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        if status == 200 { "OK" } else { "Error" },
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

fn generate_accounts(count: usize) -> Vec<JsonValue> {
    (0..count)
        .map(|i| {
            let credit = i % 3 == 2;
            json!({
                "account_id": format!("acc-{}", i + 1),
                "name": if credit { format!("Platypus Card {}", i + 1) } else { format!("Platypus Checking {}", i + 1) },
                "official_name": null,
                "type": if credit { "credit" } else { "depository" },
                "subtype": if credit { "credit card" } else { "checking" },
                "balances": {
                    "current": 250.0 + (i as f64) * 100.0,
                    "available": null,
                    "limit": if credit { json!(5000) } else { JsonValue::Null },
                    "iso_currency_code": "USD",
                    "unofficial_currency_code": null,
                },
            })
        })
        .collect()
}

fn generate_transaction(i: usize) -> JsonValue {
    let merchants = [
        ("Uber", 6.33, "22016000"),
        ("Starbucks", 4.33, "13005043"),
        ("United Airlines", 500.0, "22001000"),
        ("INTRST PYMNT", -4.22, "15001000"),
        ("Unmapped Shop", 12.0, "99999999"),
    ];
    let (name, amount, category) = merchants[i % merchants.len()];
    let date = Utc::now().date_naive() - Duration::days((i % 30) as i64);

    json!({
        "transaction_id": format!("tx-{}", i + 1),
        "account_id": "acc-1",
        "amount": amount,
        "date": date.format("%Y-%m-%d").to_string(),
        "name": name,
        "iso_currency_code": "USD",
        "unofficial_currency_code": null,
        "category_id": category,
        "pending": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::plaid::PlaidProvider;
    use crate::config::PlaidConfig;
    use crate::domain::result::{Error, ProviderErrorKind};
    use crate::domain::Credentials;
    use crate::ports::{LinkTokenRequest, ProviderAdapter};

    fn provider(server: &MockPlaidServer) -> PlaidProvider {
        PlaidProvider::new(&PlaidConfig {
            client_id: "test_client".into(),
            secret: "test_secret".into(),
            base_url: Some(server.base_url()),
            ..Default::default()
        })
        .unwrap()
    }

    fn creds() -> Credentials<'static> {
        Credentials::new("item-abc", "access-sandbox-abc")
    }

    #[tokio::test]
    async fn test_exchange_public_token() {
        let server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let exchange = provider(&server)
            .exchange_public_token("public-sandbox-abc")
            .await
            .unwrap();
        assert_eq!(exchange.access_token, "access-sandbox-abc");
        assert_eq!(exchange.item_id, "item-abc");
    }

    #[tokio::test]
    async fn test_invalid_public_token_is_auth_error() {
        let server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let err = provider(&server)
            .exchange_public_token("garbage")
            .await
            .unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Auth));
    }

    #[tokio::test]
    async fn test_accounts() {
        let server = MockPlaidServer::start(MockConfig {
            num_accounts: 5,
            ..Default::default()
        })
        .unwrap();
        let accounts = provider(&server).get_accounts(creds()).await.unwrap();
        assert_eq!(accounts.len(), 5);
        assert_eq!(accounts[2].account_type, "credit");
        assert_eq!(accounts[0].currency_code.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_transactions_are_paged() {
        let server = MockPlaidServer::start(MockConfig {
            num_transactions: 1_203,
            ..Default::default()
        })
        .unwrap();
        let today = Utc::now().date_naive();
        let txs = provider(&server)
            .get_transactions(creds(), today - Duration::days(40), today)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1_203);
        assert_eq!(txs[1_202].transaction_id, "tx-1203");
    }

    #[tokio::test]
    async fn test_item_login_required() {
        let server = MockPlaidServer::start(MockConfig {
            login_required: true,
            ..Default::default()
        })
        .unwrap();
        let err = provider(&server).get_accounts(creds()).await.unwrap_err();
        assert!(err.is_login_required());
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let server = MockPlaidServer::start(MockConfig {
            rate_limit: true,
            ..Default::default()
        })
        .unwrap();
        let err = provider(&server).get_accounts(creds()).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::RateLimited));
    }

    #[tokio::test]
    async fn test_institution_name_lookup() {
        let server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let item = provider(&server).get_item(creds()).await.unwrap();
        assert_eq!(item.institution_name.as_deref(), Some("First Platypus Bank"));
    }

    #[tokio::test]
    async fn test_asset_report_not_ready_then_ready() {
        let server = MockPlaidServer::start(MockConfig {
            report_not_ready: 1,
            ..Default::default()
        })
        .unwrap();
        let plaid = provider(&server);

        let token = plaid
            .create_asset_report("access-sandbox-abc", 10)
            .await
            .unwrap();
        let first = plaid.get_asset_report(&token).await.unwrap_err();
        assert!(first.is_product_not_ready());

        let report = plaid.get_asset_report(&token).await.unwrap();
        assert_eq!(report["asset_report_id"], "report-mock");
        assert_eq!(server.report_get_calls(), 2);

        let pdf = plaid.get_asset_report_pdf(&token).await.unwrap();
        assert_eq!(pdf, MOCK_PDF);
    }

    #[tokio::test]
    async fn test_update_mode_link_token_for_existing_item() {
        let server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let plaid = provider(&server);

        let fresh = plaid
            .create_link_token(&LinkTokenRequest {
                client_user_id: "user-1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fresh.link_token, "link-sandbox-mock");

        let update = plaid
            .create_link_token(&LinkTokenRequest {
                client_user_id: "user-1".into(),
                access_token: Some("access-sandbox-abc".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(update.link_token, "link-sandbox-update");
    }

    #[tokio::test]
    async fn test_public_token_round_trips_to_same_item() {
        let server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let plaid = provider(&server);

        let public_token = plaid.create_public_token(creds()).await.unwrap();
        assert_eq!(public_token, "public-sandbox-abc");

        let exchange = plaid.exchange_public_token(&public_token).await.unwrap();
        assert_eq!(exchange.item_id, "item-abc");
        assert_eq!(exchange.access_token, "access-sandbox-abc");
    }

    #[tokio::test]
    async fn test_live_balances() {
        let server = MockPlaidServer::start(MockConfig {
            num_accounts: 3,
            ..Default::default()
        })
        .unwrap();
        let balances = provider(&server).get_balances(creds()).await.unwrap();
        assert_eq!(balances.len(), 3);
        assert_eq!(balances[2].limit, Some(rust_decimal::Decimal::from(5000)));
        assert!(balances.iter().all(|a| a.current.is_some()));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let mut server = MockPlaidServer::start(MockConfig::default()).unwrap();
        let plaid = provider(&server);
        server.stop();
        drop(server);

        let err = plaid.get_accounts(creds()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ref e) if e.kind == ProviderErrorKind::Unavailable
        ));
    }
}
