pub mod audit;
pub mod health;
pub mod policy;
pub mod serve;
pub mod user;
