pub mod health;
pub mod intel;
pub mod settlements;
