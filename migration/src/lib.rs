pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_products;
mod m20260301_000002_create_orders;
mod m20260301_000003_create_order_lines;
mod m20260301_000004_create_basket_lines;
mod m20260315_000001_add_active_uniqueness;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_products::Migration),
            Box::new(m20260301_000002_create_orders::Migration),
            Box::new(m20260301_000003_create_order_lines::Migration),
            Box::new(m20260301_000004_create_basket_lines::Migration),
            Box::new(m20260315_000001_add_active_uniqueness::Migration),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniqueness_indexes_run_after_their_tables() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        let position = |name: &str| names.iter().position(|n| n == name).unwrap();

        let uniqueness = position("m20260315_000001_add_active_uniqueness");
        assert!(uniqueness > position("m20260301_000002_create_orders"));
        assert!(uniqueness > position("m20260301_000004_create_basket_lines"));
    }
}
