use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use almoner_inventory::{NewProduct, StockDeltas, StockLine, Warehouse};
use chrono::NaiveDate;

fn build_warehouses(count: usize, products_per: usize) -> (Vec<Warehouse>, Vec<StockLine>) {
    let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let mut lines = Vec::new();
    let warehouses = (0..count)
        .map(|w| {
            let mut warehouse = Warehouse::new(format!("warehouse-{w}")).unwrap();
            for p in 0..products_per {
                let id = warehouse
                    .add_product(
                        NewProduct {
                            name: format!("product-{p}"),
                            quantity: 1_000,
                            expiration_date: None,
                        },
                        today,
                    )
                    .unwrap();
                if p % 10 == 0 {
                    lines.push(StockLine::new(id, 3));
                }
            }
            warehouse
        })
        .collect();
    (warehouses, lines)
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_plan");
    for &(warehouses, products) in &[(1usize, 100usize), (10, 100), (50, 200)] {
        let (ws, lines) = build_warehouses(warehouses, products);
        let deltas = StockDeltas::reserve(&lines).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{warehouses}x{products}")),
            &ws,
            |b, ws| b.iter(|| deltas.plan(black_box(ws)).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
