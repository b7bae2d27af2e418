//! Catalog seeding command.

use chrono::Utc;
use rust_decimal::Decimal;

use copperleaf_core::ItemId;
use copperleaf_server::models::CatalogItem;
use copperleaf_server::store::{PgStore, Store};

use super::{CliError, connect};

/// Demo catalog: (name, price in cents, stock, critical).
const SEED_ITEMS: &[(&str, i64, i32, bool)] = &[
    ("Copper Kettle", 4_995, 25, false),
    ("Cast Iron Skillet", 3_450, 40, false),
    ("Walnut Cutting Board", 6_200, 15, false),
    ("Chef's Knife", 12_900, 10, true),
    ("Stoneware Mug Set", 2_800, 60, false),
];

/// Insert the demo catalog.
pub async fn run() -> Result<(), CliError> {
    let pool = connect().await?;
    let store = PgStore::new(pool);

    let now = Utc::now();
    for &(name, price_cents, stock, critical) in SEED_ITEMS {
        let item = CatalogItem {
            id: ItemId::generate(),
            name: name.to_owned(),
            price: Decimal::new(price_cents, 2),
            stock,
            critical,
            deleted_at: None,
            rating_count: 0,
            rating_sum: 0,
            created_at: now,
            updated_at: now,
        };
        store.upsert_item(item).await?;
        tracing::info!("Seeded item: {name}");
    }

    tracing::info!("Seeded {} catalog items", SEED_ITEMS.len());
    Ok(())
}
