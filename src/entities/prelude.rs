pub use super::basket_lines::Entity as BasketLines;
pub use super::order_lines::Entity as OrderLines;
pub use super::orders::Entity as Orders;
pub use super::products::Entity as Products;
