use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use huddle::tenant::TenantManager;
use huddle::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("huddle_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 600_000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "huddle".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("huddle")
        .password("huddle");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn query_rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn query_one(client: &tokio_postgres::Client, sql: &str) -> SimpleQueryRow {
    let mut rows = query_rows(client, sql).await;
    assert_eq!(rows.len(), 1, "expected exactly one row from: {sql}");
    rows.remove(0)
}

async fn sqlstate_of(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client
        .simple_query(sql)
        .await
        .expect_err("expected query to fail");
    err.code().expect("expected a SQLSTATE").code().to_string()
}

async fn create_room(client: &tokio_postgres::Client, name: &str) -> String {
    let row = query_one(
        client,
        &format!("INSERT INTO rooms (name, capacity) VALUES ('{name}', 8)"),
    )
    .await;
    row.get("id").unwrap().to_string()
}

fn insert_booking_sql(room_id: &str, start: &str, end: &str, key: Option<&str>) -> String {
    match key {
        Some(k) => format!(
            "INSERT INTO bookings (room_id, title, organizer_email, start_time, end_time, idempotency_key) \
             VALUES ('{room_id}', 'sync', 'org@example.com', '{start}', '{end}', '{k}')"
        ),
        None => format!(
            "INSERT INTO bookings (room_id, title, organizer_email, start_time, end_time) \
             VALUES ('{room_id}', 'sync', 'org@example.com', '{start}', '{end}')"
        ),
    }
}

// All bookings land in the week of 2030-01-07 (a Monday), comfortably in the
// future so cancellation lead times pass.

#[tokio::test]
async fn room_create_list_and_duplicate() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let row = query_one(
        &client,
        r#"INSERT INTO rooms (name, capacity, floor, amenities) VALUES ('Aurora', 8, 3, '["tv","whiteboard"]')"#,
    )
    .await;
    assert_eq!(row.get("name"), Some("Aurora"));
    assert_eq!(row.get("capacity"), Some("8"));
    assert_eq!(row.get("floor"), Some("3"));
    assert_eq!(row.get("amenities"), Some(r#"["tv","whiteboard"]"#));

    // Uniqueness is case-insensitive.
    let code = sqlstate_of(
        &client,
        "INSERT INTO rooms (name, capacity) VALUES ('AURORA', 4)",
    )
    .await;
    assert_eq!(code, "23505");

    create_room(&client, "Borealis").await;

    let rooms = query_rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(rooms.len(), 2);

    let with_tv = query_rows(&client, "SELECT * FROM rooms WHERE amenity = 'TV'").await;
    assert_eq!(with_tv.len(), 1);
    assert_eq!(with_tv[0].get("name"), Some("Aurora"));
}

#[tokio::test]
async fn booking_lifecycle_conflicts_and_cancellation() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Aurora").await;

    let row = query_one(
        &client,
        &insert_booking_sql(&room, "2030-01-07T09:00:00Z", "2030-01-07T10:00:00Z", None),
    )
    .await;
    assert_eq!(row.get("status"), Some("confirmed"));
    assert_eq!(row.get("start_time"), Some("2030-01-07T09:00:00.000Z"));
    let booking_id = row.get("id").unwrap().to_string();

    // Overlap is refused with the exclusion SQLSTATE.
    let code = sqlstate_of(
        &client,
        &insert_booking_sql(&room, "2030-01-07T09:30:00Z", "2030-01-07T10:30:00Z", None),
    )
    .await;
    assert_eq!(code, "23P01");

    // Touching endpoints are fine.
    query_one(
        &client,
        &insert_booking_sql(&room, "2030-01-07T10:00:00Z", "2030-01-07T11:00:00Z", None),
    )
    .await;

    // Cancel the first booking; the slot opens up again.
    let cancelled = query_one(
        &client,
        &format!("DELETE FROM bookings WHERE id = '{booking_id}'"),
    )
    .await;
    assert_eq!(cancelled.get("status"), Some("cancelled"));

    query_one(
        &client,
        &insert_booking_sql(&room, "2030-01-07T09:00:00Z", "2030-01-07T10:00:00Z", None),
    )
    .await;

    // The cancelled booking still shows up in listings.
    let all = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE room_id = '{room}'"),
    )
    .await;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].get("total"), Some("3"));

    // Pagination envelope.
    let page = query_rows(
        &client,
        &format!(
            "SELECT * FROM bookings WHERE room_id = '{room}' AND page_limit = 1 AND page_offset = 1"
        ),
    )
    .await;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("total"), Some("3"));
}

#[tokio::test]
async fn booking_validation_errors() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Aurora").await;

    // 10 minutes: below the 15-minute floor.
    let code = sqlstate_of(
        &client,
        &insert_booking_sql(&room, "2030-01-07T09:00:00Z", "2030-01-07T09:10:00Z", None),
    )
    .await;
    assert_eq!(code, "22023");

    // Saturday.
    let code = sqlstate_of(
        &client,
        &insert_booking_sql(&room, "2030-01-12T09:00:00Z", "2030-01-12T10:00:00Z", None),
    )
    .await;
    assert_eq!(code, "22023");

    // Unparseable timestamp.
    let code = sqlstate_of(
        &client,
        &insert_booking_sql(&room, "whenever", "2030-01-07T10:00:00Z", None),
    )
    .await;
    assert_eq!(code, "22023");

    // Unknown room.
    let code = sqlstate_of(
        &client,
        &insert_booking_sql(
            &Ulid::new().to_string(),
            "2030-01-07T09:00:00Z",
            "2030-01-07T10:00:00Z",
            None,
        ),
    )
    .await;
    assert_eq!(code, "P0002");

    // Cancelling an unknown booking.
    let code = sqlstate_of(
        &client,
        &format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new()),
    )
    .await;
    assert_eq!(code, "P0002");
}

#[tokio::test]
async fn idempotent_retry_returns_same_booking() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Aurora").await;

    let sql = insert_booking_sql(
        &room,
        "2030-01-07T09:00:00Z",
        "2030-01-07T10:00:00Z",
        Some("retry-42"),
    );
    let first = query_one(&client, &sql).await;
    let second = query_one(&client, &sql).await;
    assert_eq!(first.get("id"), second.get("id"));

    // Exactly one booking document exists.
    let all = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE room_id = '{room}'"),
    )
    .await;
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn utilization_report() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Aurora").await;
    create_room(&client, "Borealis").await;

    // Two hours on Monday morning.
    query_one(
        &client,
        &insert_booking_sql(&room, "2030-01-07T09:00:00Z", "2030-01-07T11:00:00Z", None),
    )
    .await;

    // Monday through Friday: five business days.
    let rows = query_rows(
        &client,
        "SELECT * FROM utilization WHERE start_time >= '2030-01-07' AND end_time <= '2030-01-11T23:59:59'",
    )
    .await;
    assert_eq!(rows.len(), 2);

    // Sorted by room name: Aurora first.
    assert_eq!(rows[0].get("room_name"), Some("Aurora"));
    let hours: f64 = rows[0].get("total_booking_hours").unwrap().parse().unwrap();
    assert_eq!(hours, 2.0);
    let utilization: f64 = rows[0].get("utilization_percent").unwrap().parse().unwrap();
    assert_eq!(utilization, 0.0333);

    let idle_hours: f64 = rows[1].get("total_booking_hours").unwrap().parse().unwrap();
    assert_eq!(idle_hours, 0.0);
    let idle_util: f64 = rows[1].get("utilization_percent").unwrap().parse().unwrap();
    assert_eq!(idle_util, 0.0);

    // Both bounds are required.
    let code = sqlstate_of(
        &client,
        "SELECT * FROM utilization WHERE start_time >= '2030-01-07'",
    )
    .await;
    assert_eq!(code, "22023");
}

#[tokio::test]
async fn listen_channel_validation() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Aurora").await;

    client
        .simple_query(&format!("LISTEN room_{room}"))
        .await
        .unwrap();

    let code = sqlstate_of(&client, "LISTEN kitchen").await;
    assert_eq!(code, "42000");
}
