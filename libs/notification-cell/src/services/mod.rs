pub mod dispatcher;
pub mod event_bus;
pub mod relay;
pub mod store;
pub mod supabase_store;

pub use dispatcher::*;
pub use event_bus::*;
pub use relay::*;
pub use store::*;
pub use supabase_store::*;
