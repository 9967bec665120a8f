//! Database entities for the storefront core.

pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod customer;
pub mod customer_address;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use customer_address::{Entity as CustomerAddress, Model as CustomerAddressModel};
pub use order::{Entity as Order, Model as OrderModel, PaymentMethod};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
