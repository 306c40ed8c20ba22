pub mod clock;
pub mod conflict;
pub mod directory;
pub mod lifecycle;
pub mod notices;
pub mod state_machine;
pub mod store;
pub mod supabase_store;
pub mod window;

pub use clock::*;
pub use conflict::*;
pub use directory::*;
pub use lifecycle::*;
pub use state_machine::*;
pub use store::*;
pub use supabase_store::*;
pub use window::*;
