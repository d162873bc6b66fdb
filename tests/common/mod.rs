#![allow(dead_code)]

use std::sync::Arc;

use jsonwebtoken::{encode, EncodingKey, Header};
use plant_store::{
    api::create_api_router,
    entities::{plant, plant_image, plant_sku, setup_schema, user},
    middleware::auth::Claims,
};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;

pub const SECRET: &str = "integration-secret";

pub const ANN: i32 = 1;
pub const BOB: i32 = 2;

/// Monstera, size S: 5 in stock at 10.00.
pub const MONSTERA_S: i32 = 1;
/// Monstera, size L: 2 in stock at 25.00.
pub const MONSTERA_L: i32 = 2;
/// Fern, size M: 10 in stock at 8.00.
pub const FERN_M: i32 = 3;

pub struct TestApp {
    pub base: String,
    pub db: DatabaseConnection,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn post(&self, path: &str, user_id: i32, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token(user_id))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, path: &str, user_id: i32) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token(user_id))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn stock(&self, sku_id: i32) -> i32 {
        plant_sku::Entity::find_by_id(sku_id)
            .one(&self.db)
            .await
            .expect("Failed to read SKU")
            .expect("SKU not found")
            .stock
    }
}

pub fn token(user_id: i32) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    encode(
        &Header::default(),
        &Claims { user_id, exp },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("Failed to encode token")
}

pub async fn json(response: reqwest::Response) -> Value {
    response
        .json::<Value>()
        .await
        .expect("Failed to parse response JSON")
}

/// Serves the real router on an ephemeral port over a seeded in-memory
/// database.
pub async fn spawn_app() -> TestApp {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("Failed to open database");
    setup_schema(&db).await.expect("Failed to create schema");
    seed(&db).await;

    let app = create_api_router(Arc::new(db.clone()), Arc::from(SECRET));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        base: format!("http://{addr}"),
        db,
        client: reqwest::Client::new(),
    }
}

async fn seed(db: &DatabaseConnection) {
    for (id, name, phone) in [(ANN, "ann", "13800000001"), (BOB, "bob", "13800000002")] {
        user::ActiveModel {
            id: Set(id),
            username: Set(name.into()),
            email: Set(format!("{name}@example.com")),
            phone: Set(phone.into()),
            password: Set(user::hash_password("Garden15").expect("hash")),
        }
        .insert(db)
        .await
        .expect("Failed to seed user");
    }

    let plants = [
        (1, "Monstera", "Monstera deliciosa", 1_000, true),
        (2, "Boston Fern", "Nephrolepis exaltata", 800, true),
        (3, "Ghost Orchid", "Dendrophylax lindenii", 9_900, false),
    ];
    for (id, name, latin, min_price, on_sale) in plants {
        plant::ActiveModel {
            id: Set(id),
            name: Set(name.into()),
            latin_name: Set(latin.into()),
            main_img_url: Set(format!("plants/{id}/main.jpg")),
            min_price_cents: Set(min_price),
            is_on_sale: Set(on_sale),
        }
        .insert(db)
        .await
        .expect("Failed to seed plant");
    }

    let skus = [
        (MONSTERA_L, 1, "L", 2, 2_500, 2),
        (MONSTERA_S, 1, "S", 5, 1_000, 1),
        (FERN_M, 2, "M", 10, 800, 1),
        (4, 3, "M", 1, 9_900, 1),
    ];
    for (id, plant_id, size, stock, price, sort) in skus {
        plant_sku::ActiveModel {
            id: Set(id),
            plant_id: Set(plant_id),
            size: Set(size.into()),
            stock: Set(stock),
            price_cents: Set(price),
            sort: Set(sort),
        }
        .insert(db)
        .await
        .expect("Failed to seed SKU");
    }

    for (id, url, sort) in [(1, "plants/1/side.jpg", 2), (2, "plants/1/top.jpg", 1)] {
        plant_image::ActiveModel {
            id: Set(id),
            plant_id: Set(1),
            img_url: Set(url.into()),
            sort: Set(sort),
        }
        .insert(db)
        .await
        .expect("Failed to seed image");
    }
}
