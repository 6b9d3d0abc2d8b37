//! Seed data script - populates the database with a demo catalog and shoppers
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - 8 products, one of them inactive and one out of stock
//! - 3 shoppers with varying profile completeness
//! - a bearer token per shopper for local API calls

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tracing::info;
use uuid::Uuid;

use storefront_payments::{
    auth::{AuthConfig, AuthService},
    config, db,
    entities::{product, user},
    services::pricing::to_minor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    info!("=== Storefront Payments Seed Data ===");
    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&pool).await?;

    info!("Creating products...");
    let products = create_products(&pool).await?;
    info!("  Created {} products", products.len());

    info!("Creating shoppers...");
    let users = create_users(&pool).await?;
    info!("  Created {} shoppers", users.len());

    let auth = AuthService::new(AuthConfig::from(&cfg));
    info!("");
    info!("Bearer tokens for local testing:");
    for shopper in &users {
        let token = auth.issue_token(&shopper.id, Some(&shopper.email), &["customer"])?;
        info!("  {} ({}): {}", shopper.email, shopper.id, token);
    }
    info!("");
    info!("Try:");
    info!(
        "  curl -X POST http://{}:{}/api/v1/orders -H 'Authorization: Bearer <token>' \\",
        cfg.host, cfg.port
    );
    info!(
        "       -H 'Content-Type: application/json' -d '{{\"items\":[{{\"productId\":\"{}\",\"quantity\":1}}]}}'",
        products.first().map(|p| p.id.as_str()).unwrap_or("<product-id>")
    );

    Ok(())
}

async fn create_products(db: &DatabaseConnection) -> anyhow::Result<Vec<product::Model>> {
    let products_data: Vec<(&str, Decimal, i32, bool)> = vec![
        ("Cotton T-Shirt", dec!(250.00), 120, true),
        ("Slim Fit Jeans", dec!(899.99), 40, true),
        ("Leather Wallet", dec!(349.50), 25, true),
        ("Canvas Backpack", dec!(1199.00), 10, true),
        ("Steel Water Bottle", dec!(199.95), 60, true),
        ("Wool Scarf", dec!(275.00), 0, true),
        ("Linen Shirt", dec!(649.00), 15, true),
        ("Discontinued Cap", dec!(99.00), 30, false),
    ];

    let mut created = Vec::new();
    for (name, price, stock, is_active) in products_data {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            price_minor: Set(to_minor(price)),
            stock: Set(stock),
            is_active: Set(is_active),
        }
        .insert(db)
        .await?;
        created.push(model);
    }

    Ok(created)
}

async fn create_users(db: &DatabaseConnection) -> anyhow::Result<Vec<user::Model>> {
    let users_data = vec![
        ("Mona", "Adel", "mona@example.com", Some("01001234567"), Some("12 Nile St, Giza")),
        ("Karim", "Fathy", "karim@example.com", Some("+20 122 555 0101"), None),
        ("Salma", "Youssef", "salma@example.com", None, Some("3 Corniche Rd, Alexandria")),
    ];

    let mut created = Vec::new();
    let now = Utc::now();
    for (first_name, last_name, email, phone, address) in users_data {
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            first_name: Set(first_name.to_string()),
            last_name: Set(last_name.to_string()),
            email: Set(email.to_string()),
            phone: Set(phone.map(str::to_string)),
            address: Set(address.map(str::to_string)),
            created_at: Set(now),
        }
        .insert(db)
        .await?;
        created.push(model);
    }

    Ok(created)
}
