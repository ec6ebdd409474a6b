pub mod archive;
pub mod engine;
pub mod filter;
pub mod history;
pub mod layout;
pub mod ledger;
pub mod receiver;
pub mod scanner;

pub use engine::{SendOptions, SendReport, SyncEngine};
pub use filter::SyncFilter;
pub use history::{TransferHistory, EPOCH_SENTINEL};
pub use layout::ArchiveLayout;
pub use ledger::{LedgerEntry, LedgerUpdate, TransferLedgerBuilder};
pub use receiver::Receiver;
pub use scanner::{ChangeSetFinder, ScanScope, TransferWindow};
