pub mod clients;
pub mod registry;
pub mod workunits;

pub use clients::ClientRegistry;
pub use registry::JobRegistry;
pub use workunits::{NotifyOutcome, WorkunitQueue};
