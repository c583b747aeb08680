//! Reconciliation and reporting over the balance matrix.
//!
//! `sync_product_total` keeps the denormalized per-product total in line with
//! the balances by full recompute, never by incrementing, so it is idempotent
//! and self-healing. `summarize` and `stats` are pure derivations over the
//! current warehouse/variant matrix; low/out-of-stock have no stored state.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use stockledger_core::{DomainResult, ProductId, WarehouseId};
use stockledger_ledger::BalanceRecord;

use crate::balance_store::BalanceStore;
use crate::product_directory::ProductDirectory;

/// One warehouse cell of the stock matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCell {
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reorder_point: i64,
    pub is_low_stock: bool,
}

/// Per-variant breakdown of a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStockSummary {
    /// `None` is the base, non-variant product.
    pub variant: Option<String>,
    pub total_stock: i64,
    pub warehouses: Vec<WarehouseCell>,
}

/// Stock position of one product across every variant and warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStockSummary {
    pub product_id: ProductId,
    pub title: String,
    pub total_stock: i64,
    pub variant_count: usize,
    /// Distinct warehouses across all variants of this product.
    pub warehouse_count: usize,
    pub has_low_stock: bool,
    pub has_out_of_stock: bool,
    pub variants: Vec<VariantStockSummary>,
}

/// Headline numbers derived from `summarize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStats {
    pub total_products: usize,
    pub low_stock_count: usize,
    pub out_of_stock_count: usize,
}

/// Sum of active quantities for one product (the denormalized total's source).
pub fn recompute_total<B: BalanceStore>(balances: &B, product_id: ProductId) -> DomainResult<i64> {
    Ok(balances
        .list_active_for_product(product_id)?
        .iter()
        .map(|r| r.quantity)
        .sum())
}

/// Recomputes denormalized totals and answers "how much stock, where, is it low?".
#[derive(Debug)]
pub struct ReconciliationAggregator<B, P> {
    balances: B,
    directory: P,
}

impl<B, P> ReconciliationAggregator<B, P>
where
    B: BalanceStore,
    P: ProductDirectory,
{
    pub fn new(balances: B, directory: P) -> Self {
        Self { balances, directory }
    }

    /// Resync the cached total for one product. Idempotent: with no
    /// intervening mutation, a second call writes the same value.
    pub fn sync_product_total(&self, product_id: ProductId) -> DomainResult<i64> {
        let total = recompute_total(&self.balances, product_id)?;
        self.directory.set_total_stock(product_id, total)?;
        debug!(product_id = %product_id, total, "resynced denormalized product total");
        Ok(total)
    }

    /// Nested product → variant → warehouse summary, products ordered by
    /// title ascending (falling back to the id's string form), ties broken by
    /// product id.
    pub fn summarize(&self) -> DomainResult<Vec<ProductStockSummary>> {
        let snapshot = self.balances.snapshot_active()?;

        let mut by_product: HashMap<ProductId, Vec<BalanceRecord>> = HashMap::new();
        for record in snapshot {
            by_product.entry(record.product_id).or_default().push(record);
        }

        let mut summaries = Vec::with_capacity(by_product.len());
        for (product_id, records) in by_product {
            let title = self
                .directory
                .title(product_id)?
                .unwrap_or_else(|| product_id.to_string());
            summaries.push(summarize_product(product_id, title, records));
        }

        summaries.sort_by(|a, b| {
            a.title
                .cmp(&b.title)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        Ok(summaries)
    }

    /// Headline counts over the grouped products.
    pub fn stats(&self) -> DomainResult<StockStats> {
        let summaries = self.summarize()?;
        Ok(StockStats {
            total_products: summaries.len(),
            low_stock_count: summaries.iter().filter(|s| s.has_low_stock).count(),
            out_of_stock_count: summaries.iter().filter(|s| s.has_out_of_stock).count(),
        })
    }
}

fn summarize_product(
    product_id: ProductId,
    title: String,
    records: Vec<BalanceRecord>,
) -> ProductStockSummary {
    // BTreeMap ordering puts the base variant (None) first, then names ascending.
    let mut by_variant: BTreeMap<Option<String>, Vec<&BalanceRecord>> = BTreeMap::new();
    let mut distinct_warehouses: HashSet<WarehouseId> = HashSet::new();
    for record in &records {
        by_variant.entry(record.variant.clone()).or_default().push(record);
        distinct_warehouses.insert(record.warehouse_id);
    }

    let mut variants = Vec::with_capacity(by_variant.len());
    let mut total_stock = 0i64;
    let mut has_low_stock = false;
    let mut has_out_of_stock = false;

    for (variant, cells) in by_variant {
        let mut warehouses: Vec<WarehouseCell> = cells
            .iter()
            .map(|r| WarehouseCell {
                warehouse_id: r.warehouse_id,
                quantity: r.quantity,
                reorder_point: r.reorder_point,
                is_low_stock: r.is_low_stock(),
            })
            .collect();
        warehouses.sort_by_key(|c| c.warehouse_id);

        has_low_stock |= warehouses.iter().any(|c| c.is_low_stock);
        has_out_of_stock |= warehouses.iter().any(|c| c.quantity == 0);

        let variant_total: i64 = warehouses.iter().map(|c| c.quantity).sum();
        total_stock += variant_total;
        variants.push(VariantStockSummary {
            variant,
            total_stock: variant_total,
            warehouses,
        });
    }

    ProductStockSummary {
        product_id,
        title,
        total_stock,
        variant_count: variants.len(),
        warehouse_count: distinct_warehouses.len(),
        has_low_stock,
        has_out_of_stock,
        variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    use stockledger_ledger::NewBalance;

    use crate::balance_store::InMemoryBalanceStore;
    use crate::product_directory::InMemoryProductDirectory;

    type Aggregator = ReconciliationAggregator<Arc<InMemoryBalanceStore>, Arc<InMemoryProductDirectory>>;

    fn setup() -> (Arc<InMemoryBalanceStore>, Arc<InMemoryProductDirectory>, Aggregator) {
        let balances = Arc::new(InMemoryBalanceStore::new());
        let directory = Arc::new(InMemoryProductDirectory::new());
        let aggregator = ReconciliationAggregator::new(balances.clone(), directory.clone());
        (balances, directory, aggregator)
    }

    fn seed(
        balances: &InMemoryBalanceStore,
        product: ProductId,
        variant: Option<&str>,
        warehouse: WarehouseId,
        quantity: i64,
        reorder_point: i64,
    ) {
        balances
            .create(NewBalance {
                product_id: product,
                variant: variant.map(str::to_string),
                warehouse_id: warehouse,
                quantity,
                reorder_point,
            })
            .unwrap();
    }

    #[test]
    fn sync_is_idempotent_and_sums_only_active_records() {
        let (balances, directory, aggregator) = setup();
        let product = ProductId::new();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();

        seed(&balances, product, None, w1, 10, 0);
        seed(&balances, product, Some("xl"), w2, 5, 0);
        let doomed = balances
            .create(NewBalance {
                product_id: product,
                variant: Some("discontinued".to_string()),
                warehouse_id: w1,
                quantity: 100,
                reorder_point: 0,
            })
            .unwrap();
        balances.soft_delete(doomed.id).unwrap();

        assert_eq!(aggregator.sync_product_total(product).unwrap(), 15);
        assert_eq!(aggregator.sync_product_total(product).unwrap(), 15);
        assert_eq!(directory.total_stock(product).unwrap(), Some(15));
    }

    #[test]
    fn summary_totals_and_flags_are_internally_consistent() {
        let (balances, directory, aggregator) = setup();
        let product = ProductId::new();
        directory.upsert_title(product, "Drip Kettle");
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();

        seed(&balances, product, None, w1, 20, 5);
        seed(&balances, product, Some("steel"), w1, 3, 5); // low
        seed(&balances, product, Some("steel"), w2, 0, 2); // low + out

        let summaries = aggregator.summarize().unwrap();
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];

        assert_eq!(s.title, "Drip Kettle");
        assert_eq!(s.variant_count, 2);
        assert_eq!(s.warehouse_count, 2);
        assert!(s.has_low_stock);
        assert!(s.has_out_of_stock);

        // Base variant sorts first.
        assert_eq!(s.variants[0].variant, None);
        assert_eq!(s.variants[1].variant.as_deref(), Some("steel"));

        for v in &s.variants {
            let cell_sum: i64 = v.warehouses.iter().map(|c| c.quantity).sum();
            assert_eq!(cell_sum, v.total_stock);
        }
        let variant_sum: i64 = s.variants.iter().map(|v| v.total_stock).sum();
        assert_eq!(variant_sum, s.total_stock);
        assert_eq!(s.total_stock, 23);
    }

    #[test]
    fn flags_are_not_raised_when_everything_is_stocked() {
        let (balances, _directory, aggregator) = setup();
        let product = ProductId::new();
        seed(&balances, product, None, WarehouseId::new(), 15, 10);

        let s = &aggregator.summarize().unwrap()[0];
        assert!(!s.has_low_stock);
        assert!(!s.has_out_of_stock);

        let stats = aggregator.stats().unwrap();
        assert_eq!(
            stats,
            StockStats {
                total_products: 1,
                low_stock_count: 0,
                out_of_stock_count: 0,
            }
        );
    }

    #[test]
    fn products_sort_by_title_with_id_fallback() {
        let (balances, directory, aggregator) = setup();
        let named_a = ProductId::new();
        let named_b = ProductId::new();
        let unnamed = ProductId::new();
        directory.upsert_title(named_a, "Aeropress");
        directory.upsert_title(named_b, "Burr Grinder");

        seed(&balances, named_b, None, WarehouseId::new(), 1, 0);
        seed(&balances, unnamed, None, WarehouseId::new(), 1, 0);
        seed(&balances, named_a, None, WarehouseId::new(), 1, 0);

        let summaries = aggregator.summarize().unwrap();
        assert_eq!(summaries[0].title, "Aeropress");
        assert_eq!(summaries[1].title, "Burr Grinder");
        // The unnamed product falls back to its id's string form; UUIDs sort
        // after capitalized titles in byte order.
        assert_eq!(summaries[2].product_id, unnamed);
    }

    #[test]
    fn stats_count_products_not_cells() {
        let (balances, _directory, aggregator) = setup();
        let low = ProductId::new();
        let out = ProductId::new();
        let fine = ProductId::new();

        // Two low cells on one product still count once.
        seed(&balances, low, Some("a"), WarehouseId::new(), 1, 5);
        seed(&balances, low, Some("b"), WarehouseId::new(), 2, 5);
        seed(&balances, out, None, WarehouseId::new(), 0, 0);
        seed(&balances, fine, None, WarehouseId::new(), 50, 5);

        let stats = aggregator.stats().unwrap();
        assert_eq!(stats.total_products, 3);
        assert_eq!(stats.low_stock_count, 2); // `out` is also low (0 <= 0)
        assert_eq!(stats.out_of_stock_count, 1);
    }

    #[test]
    fn summary_wire_shape_is_stable() {
        let (balances, directory, aggregator) = setup();
        let product = ProductId::new();
        directory.upsert_title(product, "Gooseneck Kettle");
        seed(&balances, product, None, WarehouseId::new(), 0, 3);

        let summaries = aggregator.summarize().unwrap();
        let json = serde_json::to_value(&summaries[0]).unwrap();

        assert_eq!(json["title"], "Gooseneck Kettle");
        assert_eq!(json["total_stock"], 0);
        assert_eq!(json["has_low_stock"], true);
        assert_eq!(json["has_out_of_stock"], true);
        let cell = &json["variants"][0]["warehouses"][0];
        assert_eq!(cell["quantity"], 0);
        assert_eq!(cell["reorder_point"], 3);
        assert_eq!(cell["is_low_stock"], true);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any generated matrix, the summary's variant totals sum
        /// to the product total, which equals the resynced denormalized total.
        #[test]
        fn summary_sums_agree_with_the_denormalized_total(
            quantities in prop::collection::vec(0i64..10_000, 1..12)
        ) {
            let (balances, directory, aggregator) = setup();
            let product = ProductId::new();
            directory.upsert_title(product, "Prop Product");

            let expected: i64 = quantities.iter().sum();
            for (i, q) in quantities.iter().enumerate() {
                // Spread cells across variants; every cell gets its own warehouse.
                let variant = if i % 3 == 0 { None } else { Some(format!("v{}", i % 3)) };
                seed(&balances, product, variant.as_deref(), WarehouseId::new(), *q, 0);
            }

            let total = aggregator.sync_product_total(product).unwrap();
            prop_assert_eq!(total, expected);

            let summaries = aggregator.summarize().unwrap();
            prop_assert_eq!(summaries.len(), 1);
            let s = &summaries[0];
            prop_assert_eq!(s.total_stock, expected);
            let variant_sum: i64 = s.variants.iter().map(|v| v.total_stock).sum();
            prop_assert_eq!(variant_sum, s.total_stock);
            for v in &s.variants {
                let cell_sum: i64 = v.warehouses.iter().map(|c| c.quantity).sum();
                prop_assert_eq!(cell_sum, v.total_stock);
            }
        }
    }
}
