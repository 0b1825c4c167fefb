pub mod decode;
pub mod gate;
pub mod health;
pub mod metrics;
pub mod normalize;
pub mod persist;
pub mod record;
pub mod sink;
pub mod store;
pub mod sweep;
pub mod validation;
