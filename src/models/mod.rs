pub mod binding;
pub mod pool;

pub use binding::{build_short_url, Binding, BindingStatus, NewBinding};
pub use pool::{CodeStatus, PoolEntry, PoolStats};
