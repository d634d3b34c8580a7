//! Data models for Libris

pub mod author;
pub mod book;
pub mod category;
pub mod loan;
pub mod stats;
pub mod user;

// Re-export commonly used types
pub use author::{Author, AuthorShort};
pub use book::{Book, BookShort};
pub use category::Category;
pub use loan::{BookStock, CopyDiscrepancy, Loan, LoanDetails, LoanRecord, LoanStatus, NewLoan};
pub use stats::CatalogStats;
pub use user::{User, UserClaims, UserProfile};
