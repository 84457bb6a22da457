pub mod intelligence;
pub mod notify;
pub mod summarize;

pub use intelligence::{extract_with_retry, DocumentIntelligence, HttpDocumentIntelligence, RetryPolicy};
pub use notify::{HttpNotifier, LogNotifier, Notifier};
pub use summarize::{HttpSummarizer, Summarizer};
