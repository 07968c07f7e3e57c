use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use fieldbook::config::EngineSettings;
use fieldbook::tenant::TenantManager;
use fieldbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("fieldbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        1000,
        Duration::from_secs(3600),
        EngineSettings::default(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "fieldbook".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("fieldbook")
        .password("fieldbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Result<Vec<SimpleQueryRow>, tokio_postgres::Error> {
    let messages = client.simple_query(sql).await?;
    Ok(messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect())
}

async fn one_row(client: &Client, sql: &str) -> SimpleQueryRow {
    let mut found = rows(client, sql).await.unwrap();
    assert_eq!(found.len(), 1, "expected one row for {sql}");
    found.remove(0)
}

async fn sql_error(client: &Client, sql: &str) -> tokio_postgres::Error {
    match client.simple_query(sql).await {
        Ok(_) => panic!("expected failure: {sql}"),
        Err(e) => e,
    }
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

fn json(row: &SimpleQueryRow, col: &str) -> serde_json::Value {
    serde_json::from_str(row.get(col).unwrap()).unwrap()
}

struct Catalog {
    owner: Ulid,
    venue: Ulid,
    field: Ulid,
}

/// Venue + field with a Wednesday 08:00–22:00 rule at 120000/hour.
async fn seed(client: &Client) -> Catalog {
    let catalog = Catalog {
        owner: Ulid::new(),
        venue: Ulid::new(),
        field: Ulid::new(),
    };
    client
        .simple_query(&format!(
            "INSERT INTO venues VALUES ('{}', '{}')",
            catalog.venue, catalog.owner
        ))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "INSERT INTO fields VALUES ('{}', '{}')",
            catalog.field, catalog.venue
        ))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "INSERT INTO price_rules VALUES ('{}', '{}', 3, '08:00', '22:00', 120000)",
            Ulid::new(),
            catalog.field
        ))
        .await
        .unwrap();
    catalog
}

fn book_sql(c: &Catalog, customer: Ulid, start: &str, end: &str, method: &str) -> String {
    format!(
        "INSERT INTO bookings VALUES ('{customer}', '{}', '{}', '2030-01-02', '{start}', '{end}', {method})",
        c.field, c.venue
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn cash_booking_lifecycle() {
    let addr = start_test_server().await;
    let client = connect(addr, "cash_flow").await;
    let c = seed(&client).await;
    let customer = Ulid::new();

    let row = one_row(&client, &book_sql(&c, customer, "18:00", "19:30", "'CASH'")).await;
    let booking_id = row.get("id").unwrap().to_string();
    assert_eq!(row.get("status"), Some("PENDING"));
    assert_eq!(row.get("total_price"), Some("180000"));
    let slots = json(&row, "slots");
    assert_eq!(slots.as_array().unwrap().len(), 3);
    assert_eq!(slots[0]["start_time"], "18:00");
    assert_eq!(slots[2]["end_time"], "19:30");
    let payment = json(&row, "payment");
    assert_eq!(payment["method"], "CASH");
    assert_eq!(payment["status"], "PENDING");

    // Overlap loses with exclusion_violation.
    let err = sql_error(&client, &book_sql(&c, Ulid::new(), "19:00", "20:00", "NULL")).await;
    assert_eq!(sqlstate(&err), Some("23P01"));

    // Only the venue owner may confirm cash.
    let err = sql_error(
        &client,
        &format!(
            "INSERT INTO cash_confirmations VALUES ('{booking_id}', '{}', 'SUCCESS')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(sqlstate(&err), Some("42501"));

    let row = one_row(
        &client,
        &format!(
            "INSERT INTO cash_confirmations VALUES ('{booking_id}', '{}', 'SUCCESS')",
            c.owner
        ),
    )
    .await;
    assert_eq!(row.get("status"), Some("CONFIRMED"));
    assert_eq!(json(&row, "payment")["status"], "SUCCESS");

    let row = one_row(&client, &format!("SELECT * FROM bookings WHERE id = '{booking_id}'")).await;
    assert_eq!(row.get("status"), Some("CONFIRMED"));

    let history = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE customer_id = '{customer}' AND page = 0 AND size = 5"),
    )
    .await
    .unwrap();
    assert_eq!(history.len(), 1);

    // Not completed yet.
    let err = sql_error(
        &client,
        &format!(
            "SELECT * FROM review_eligibility WHERE booking_id = '{booking_id}' AND customer_id = '{customer}'"
        ),
    )
    .await;
    assert_eq!(sqlstate(&err), Some("55000"));
}

#[tokio::test]
async fn online_booking_redirect_and_callback() {
    let addr = start_test_server().await;
    let client = connect(addr, "online_flow").await;
    let c = seed(&client).await;
    let customer = Ulid::new();

    let row = one_row(&client, &book_sql(&c, customer, "20:00", "21:00", "'ONLINE'")).await;
    let booking_id = row.get("id").unwrap().to_string();
    let payment = json(&row, "payment");
    assert_eq!(payment["method"], "VNPAY");
    let expected = format!(
        "https://pay.example.com/VNPAY/pay?bookingId={booking_id}&amount=120000"
    );
    assert_eq!(payment["redirect_url"], expected.as_str());

    let row = one_row(
        &client,
        &format!(
            "SELECT * FROM payment_redirects WHERE booking_id = '{booking_id}' AND customer_id = '{customer}'"
        ),
    )
    .await;
    assert_eq!(row.get("redirect_url"), Some(expected.as_str()));

    // Cash confirmation does not apply to an online booking.
    let err = sql_error(
        &client,
        &format!(
            "INSERT INTO cash_confirmations VALUES ('{booking_id}', '{}', 'SUCCESS')",
            c.owner
        ),
    )
    .await;
    assert_eq!(sqlstate(&err), Some("42809"));

    let row = one_row(
        &client,
        &format!("INSERT INTO gateway_confirmations VALUES ('{booking_id}', 12000000, 'VNP-1')"),
    )
    .await;
    assert_eq!(row.get("status"), Some("CONFIRMED"));
    let payment = json(&row, "payment");
    assert_eq!(payment["status"], "SUCCESS");
    assert_eq!(payment["transaction_ref"], "VNP-1");
}

#[tokio::test]
async fn extended_protocol_unavailable_slots() {
    let addr = start_test_server().await;
    let client = connect(addr, "extended").await;
    let c = seed(&client).await;

    client
        .simple_query(&book_sql(&c, Ulid::new(), "18:00", "19:00", "NULL"))
        .await
        .unwrap();
    client
        .simple_query(&book_sql(&c, Ulid::new(), "19:00", "19:45", "NULL"))
        .await
        .unwrap();

    let field = c.field.to_string();
    let found = client
        .query(
            "SELECT * FROM unavailable_slots WHERE field_id = $1 AND date = $2",
            &[&field, &"2030-01-02"],
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("start_time"), "18:00");
    assert_eq!(found[0].get::<_, String>("end_time"), "19:45");
}

#[tokio::test]
async fn bad_statements_map_to_sqlstates() {
    let addr = start_test_server().await;
    let client = connect(addr, "errors").await;
    let c = seed(&client).await;

    let err = sql_error(&client, &book_sql(&c, Ulid::new(), "18:00", "19:00", "'BARTER'")).await;
    assert_eq!(sqlstate(&err), Some("42601"));

    let err = sql_error(&client, "SELECT * FROM courts WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'").await;
    assert_eq!(sqlstate(&err), Some("42P01"));

    // Thursday has no price rule.
    let err = sql_error(
        &client,
        &format!(
            "INSERT INTO bookings VALUES ('{}', '{}', '{}', '2030-01-03', '18:00', '19:00')",
            Ulid::new(),
            c.field,
            c.venue
        ),
    )
    .await;
    assert_eq!(sqlstate(&err), Some("23514"));

    let err = sql_error(&client, &format!("SELECT * FROM bookings WHERE id = '{}'", Ulid::new())).await;
    assert_eq!(sqlstate(&err), Some("P0002"));
}

#[tokio::test]
async fn databases_are_isolated_tenants() {
    let addr = start_test_server().await;
    let a = connect(addr, "club_a").await;
    let b = connect(addr, "club_b").await;
    let c = seed(&a).await;

    one_row(&a, &book_sql(&c, Ulid::new(), "10:00", "11:00", "NULL")).await;

    // Same ids are unknown in the other tenant.
    let err = sql_error(&b, &book_sql(&c, Ulid::new(), "10:00", "11:00", "NULL")).await;
    assert_eq!(sqlstate(&err), Some("P0002"));
}
