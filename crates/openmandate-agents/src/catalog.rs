//! Merchant product catalog
//!
//! In-memory catalog with stock levels. Lookups are case-insensitive over
//! name and description; the seeded inventory matches the demo flow.

use chrono::{Duration, Utc};
use openmandate_types::{Amount, MerchantId, ProductOffer, Sku};
use serde::{Deserialize, Serialize};

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub unit_price: Amount,
    pub category: String,
    pub merchant: MerchantId,
    pub stock: u32,
    pub refund_period_days: u32,
}

/// In-memory product catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// The demo inventory: five electronics items across two merchants
    pub fn seeded() -> Self {
        let entry = |sku: &str,
                     name: &str,
                     description: &str,
                     cents: u64,
                     merchant: &str,
                     stock: u32,
                     refund_period_days: u32| Product {
            sku: Sku::new(sku),
            name: name.to_string(),
            description: description.to_string(),
            unit_price: Amount::from_cents(cents),
            category: "electronics".to_string(),
            merchant: MerchantId::new(merchant),
            stock,
            refund_period_days,
        };
        Self::new(vec![
            entry(
                "laptop_001",
                "High-performance laptop",
                "Latest generation processor, 32GB RAM, 1TB SSD",
                159_999,
                "tech_store",
                15,
                30,
            ),
            entry(
                "laptop_002",
                "Mid-range business laptop",
                "Perfect for business and productivity tasks",
                112_950,
                "tech_store",
                25,
                30,
            ),
            entry(
                "laptop_003",
                "Entry-level student laptop",
                "Affordable option for students and basic tasks",
                78_900,
                "generic_merchant",
                40,
                14,
            ),
            entry(
                "phone_001",
                "Flagship smartphone",
                "Latest smartphone with advanced camera",
                99_999,
                "tech_store",
                30,
                30,
            ),
            entry(
                "tablet_001",
                "Professional tablet",
                "High-resolution display, stylus included",
                64_999,
                "tech_store",
                20,
                30,
            ),
        ])
    }

    /// Look up a product by SKU
    pub fn get(&self, sku: &Sku) -> Option<&Product> {
        self.products.iter().find(|p| &p.sku == sku)
    }

    /// Search by free-text query and optional category, quoting prices
    /// valid for one day
    pub fn search(
        &self,
        query: &str,
        category: Option<&str>,
        max_results: usize,
    ) -> Vec<ProductOffer> {
        let query = query.to_lowercase();
        let quote_expires_at = Utc::now() + Duration::days(1);
        self.products
            .iter()
            .filter(|p| {
                category
                    .map(|c| p.category.eq_ignore_ascii_case(c))
                    .unwrap_or(true)
            })
            .filter(|p| {
                query.is_empty()
                    || p.name.to_lowercase().contains(&query)
                    || p.description.to_lowercase().contains(&query)
            })
            .take(max_results)
            .map(|p| ProductOffer {
                sku: p.sku.clone(),
                name: p.name.clone(),
                unit_price: p.unit_price,
                merchant: p.merchant.clone(),
                category: p.category.clone(),
                quote_expires_at,
            })
            .collect()
    }

    /// Number of products on file
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
