pub mod account;
pub mod scheduler;
pub mod transfer;

pub use account::AccountService;
pub use scheduler::Scheduler;
pub use transfer::TransferService;
